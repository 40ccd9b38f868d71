//! Request lifecycle controller for streaming-capable HTTP calls.
//!
//! # Overview
//! Submits one outbound call over a pluggable `Transport` and reduces every
//! way that transport can finish (decoded messages, a failure string, a
//! completion signal, or a cancel from the caller) into one ordered sequence
//! of notifications to a single callback. The transport does the I/O (the
//! host-does-IO pattern); the core decides what the caller sees.
//!
//! # Design
//! - `classify` maps raw failure strings to a kind, status and message.
//! - `Lifecycle` is the per-call state machine. It returns notifications
//!   instead of calling back, so it is testable without a transport.
//! - `Client::submit` wires a transport call to a `Lifecycle` and hands back
//!   a `Handle` that can cancel it.
//! - A streamed response gets one extra body-less notification after its
//!   last message, so callers can tell "last value" from "stream closed".

pub mod classify;
pub mod controller;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod request;
pub mod transport;

pub use classify::{classify, Classified};
pub use controller::{Client, Handle};
pub use error::{BuildError, ErrorKind, RequestError};
pub use http::{deserialize_headers, Headers, HttpMethod, Response};
pub use lifecycle::{Lifecycle, Phase, Settlement};
pub use request::{Body, ClientConfig, Query, RequestSpec};
pub use transport::{header_chunk_probe, ChunkProbe, Signals, Transport, TransportConfig, TransportHandle};
