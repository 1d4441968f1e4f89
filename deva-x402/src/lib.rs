#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Payment and error types for the Deva API transport.
//!
//! The Deva API can answer any call with `402 Payment Required` and a payment
//! challenge. This crate holds the transport-independent half of handling
//! that: reading the challenge off a response, the pluggable [`Payer`] that
//! settles it, and the normalized [`DevaError`] every failure is reported as.
//! The HTTP executor that drives the retry loop lives in `deva-http`.
//!
//! # Modules
//!
//! - [`challenge`] - [`PaymentChallenge`] and its header/body parser
//! - [`payer`] - [`Payer`] capability, [`PaymentContext`] and [`PaymentResult`]
//! - [`error`] - [`DevaError`], [`ApiError`] and [`PaymentRequiredError`]
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod challenge;
pub mod error;
pub mod payer;

pub use challenge::{ChallengeAmount, PaymentChallenge};
pub use error::{
    ApiError, BoxError, DevaError, PaymentRequiredError, RETRYABLE_STATUS_CODES, is_retryable_status,
};
pub use payer::{BoxFuture, DeclinePayer, Payer, PayerFn, PaymentContext, PaymentResult};
