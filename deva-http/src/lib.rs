#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport for the Deva API.
//!
//! [`DevaHttpClient`] turns an [`ApiRequest`] into an HTTP call and owns the
//! cross-cutting behavior every Deva resource relies on: bearer
//! authentication, per-call timeouts, transient retries with exponential
//! backoff, x402 payment negotiation through a pluggable [`Payer`] and
//! normalization of every failure into a [`DevaError`]. Streaming endpoints
//! are decoded from server-sent events by [`SseStream`].
//!
//! # Modules
//!
//! - [`client`] - the executor, [`DevaHttpClient`]
//! - [`request`] - per-call descriptors, [`ApiRequest`]
//! - [`config`] - [`ClientConfig`] and [`PaymentConfig`]
//! - [`url`] - query encoding and [`build_url`]
//! - [`body`] - request body encoding
//! - [`send`] - the replaceable network layer, [`HttpSend`]
//! - [`credential`] - the shared API key
//! - [`wallet`] - the built-in wallet [`Payer`]
//! - [`sse`] - event stream decoding
//! - [`types`] - streamed chat chunk types
//! - [`constants`] - defaults and header names
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod body;
pub mod client;
pub mod config;
pub mod constants;
pub mod credential;
pub mod request;
pub mod send;
pub mod sse;
pub mod types;
pub mod url;
pub mod wallet;

pub use body::{EncodedBody, FormPart, MultipartForm, RequestBody, WireBody};
pub use client::DevaHttpClient;
pub use config::{ClientConfig, PaymentConfig};
pub use credential::Credential;
pub use request::ApiRequest;
pub use send::{ByteStream, HttpSend, ReqwestSender, SendFn, WireRequest, WireResponse};
pub use sse::{SseDecoder, SseStream};
pub use types::{ChatStreamChunk, ChunkChoice, ChunkDelta};
pub use url::{Query, QueryValue, build_url};
pub use wallet::WalletPayer;

pub use deva_x402::{
    ApiError, BoxError, BoxFuture, ChallengeAmount, DeclinePayer, DevaError, Payer, PayerFn,
    PaymentChallenge, PaymentContext, PaymentRequiredError, PaymentResult,
};
