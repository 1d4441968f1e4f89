//! Request body encoding.
//!
//! JSON values are serialized and tagged `application/json`. Raw bytes, text
//! and multipart forms are passed through untouched; multipart content type
//! and boundary are chosen by the sender.

use bytes::Bytes;
use http::HeaderValue;
use http::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::Value;

use deva_x402::DevaError;

/// A request body as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// A JSON document.
    Json(Value),
    /// Opaque bytes.
    Bytes(Bytes),
    /// Plain text.
    Text(String),
    /// A multipart form.
    Multipart(MultipartForm),
}

impl RequestBody {
    /// Serializes `value` into a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`DevaError::Json`] if `value` cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, DevaError> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Produces the wire body and the content type it implies.
    ///
    /// # Errors
    ///
    /// Returns [`DevaError::Json`] if a JSON body fails to serialize.
    pub fn encode(&self) -> Result<EncodedBody, DevaError> {
        let encoded = match self {
            Self::Json(value) => EncodedBody {
                body: WireBody::Bytes(Bytes::from(serde_json::to_vec(value)?)),
                content_type: Some(HeaderValue::from_static("application/json")),
            },
            Self::Bytes(bytes) => EncodedBody::untyped(WireBody::Bytes(bytes.clone())),
            Self::Text(text) => EncodedBody::untyped(WireBody::Text(text.clone())),
            Self::Multipart(form) => EncodedBody::untyped(WireBody::Multipart(form.clone())),
        };
        Ok(encoded)
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<MultipartForm> for RequestBody {
    fn from(form: MultipartForm) -> Self {
        Self::Multipart(form)
    }
}

/// The body as handed to an [`HttpSend`](crate::HttpSend) implementation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WireBody {
    /// No body.
    #[default]
    Empty,
    /// Opaque bytes.
    Bytes(Bytes),
    /// Plain text.
    Text(String),
    /// A multipart form; the sender picks the boundary.
    Multipart(MultipartForm),
}

impl WireBody {
    /// Returns the body bytes for byte and text bodies.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes.as_ref()),
            Self::Text(text) => Some(text.as_bytes()),
            Self::Empty | Self::Multipart(_) => None,
        }
    }
}

/// Result of [`RequestBody::encode`].
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBody {
    /// The wire body.
    pub body: WireBody,
    /// Content type to send unless the caller set one.
    pub content_type: Option<HeaderValue>,
}

impl EncodedBody {
    const fn untyped(body: WireBody) -> Self {
        Self {
            body,
            content_type: None,
        }
    }

    /// An empty body with no content type.
    #[must_use]
    pub const fn empty() -> Self {
        Self::untyped(WireBody::Empty)
    }

    /// Adds the implied content type to `headers` unless one is already set.
    pub fn apply_content_type(&self, headers: &mut http::HeaderMap) {
        if let Some(content_type) = &self.content_type {
            headers
                .entry(CONTENT_TYPE)
                .or_insert_with(|| content_type.clone());
        }
    }
}

/// A multipart form that can be sent more than once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartForm {
    parts: Vec<FormPart>,
}

/// One field of a [`MultipartForm`].
#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    /// Field name.
    pub name: String,
    /// Field content.
    pub data: Bytes,
    /// File name, for file fields.
    pub file_name: Option<String>,
    /// MIME type of the content.
    pub content_type: Option<String>,
}

impl MultipartForm {
    /// Creates an empty form.
    #[must_use]
    pub const fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Appends a text field.
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart {
            name: name.into(),
            data: Bytes::from(value.into()),
            file_name: None,
            content_type: None,
        });
        self
    }

    /// Appends a file field.
    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> Self {
        self.parts.push(FormPart {
            name: name.into(),
            data: data.into(),
            file_name: Some(file_name.into()),
            content_type: content_type.map(str::to_owned),
        });
        self
    }

    /// The fields in insertion order.
    #[must_use]
    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    /// Converts into a [`reqwest::multipart::Form`].
    ///
    /// # Errors
    ///
    /// Returns an error if a part carries an unparsable MIME type.
    pub fn to_reqwest(&self) -> Result<reqwest::multipart::Form, reqwest::Error> {
        let mut form = reqwest::multipart::Form::new();
        for part in &self.parts {
            let mut field = reqwest::multipart::Part::bytes(part.data.to_vec());
            if let Some(file_name) = &part.file_name {
                field = field.file_name(file_name.clone());
            }
            if let Some(content_type) = &part.content_type {
                field = field.mime_str(content_type)?;
            }
            form = form.part(part.name.clone(), field);
        }
        Ok(form)
    }
}
