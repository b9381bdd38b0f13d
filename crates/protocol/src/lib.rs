//! Wire types for the Gremlin Server protocol.
//!
//! This crate contains the serde-serializable request and response messages
//! exchanged with a Gremlin Server (or a Gremlin-compatible managed graph
//! database) over WebSocket, along with the [`Codec`] boundary that turns them
//! into frames.
//!
//! Types in this crate are pure data. Connection handling, correlation, and
//! pooling are built on top of them in `gremlin-runtime`.

pub mod auth;
pub mod codec;
pub mod request;
pub mod response;
pub mod status;

pub use auth::{SASL_MECHANISM_PLAIN, sasl_plain};
pub use codec::{Codec, CodecError, GRAPHSON_V2_MIME, GraphSonCodec, split_request_frame};
pub use request::{RequestId, RequestMessage, ops};
pub use response::{ResponseMessage, ResponseResult, ResponseStatus};
pub use status::StatusCode;
