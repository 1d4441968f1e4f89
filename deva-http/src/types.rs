//! Chunk types of the streaming chat endpoint.
//!
//! Only the commonly used fields are typed; everything else the server sends
//! is kept in the `extra` maps. A known field whose value has an unexpected
//! type reads as its default, so any JSON object decodes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// One streamed chat completion chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatStreamChunk {
    /// Completion identifier.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Object type, usually `chat.completion.chunk`.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Creation time in Unix seconds.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub created: Option<Number>,
    /// Model that produced the chunk.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Incremental choices.
    #[serde(default, deserialize_with = "lenient")]
    pub choices: Vec<ChunkChoice>,
    /// Unrecognized fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatStreamChunk {
    /// Concatenated content deltas of all choices.
    #[must_use]
    pub fn content(&self) -> String {
        self.choices
            .iter()
            .filter_map(|choice| choice.delta.as_ref()?.content.as_deref())
            .collect()
    }
}

/// A choice within a [`ChatStreamChunk`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Position of the choice.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub index: Option<Number>,
    /// Incremental message content.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChunkDelta>,
    /// Why generation stopped, on the last chunk of a choice.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Unrecognized fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Incremental message content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Author role, usually only on the first chunk.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Text fragment.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Unrecognized fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
