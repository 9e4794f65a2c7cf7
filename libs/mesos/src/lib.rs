//! # tierd-mesos
//!
//! Message types for the cluster manager's v1 scheduler HTTP API, encoded as
//! JSON, plus the RecordIO framing used on the subscription stream.
//!
//! ## Wire Format
//!
//! - Calls are POSTed as a single JSON document to `/api/v1/scheduler`
//! - The SUBSCRIBE response is a chunked stream of `<length>\n<json>` records
//! - Every other call is answered with `202 Accepted` and an empty body
//!
//! Field names and enum spellings follow the published API exactly. Unknown
//! fields are ignored on decode, and unknown event types decode to
//! [`EventType::Unknown`] so newer masters do not break the stream.
//!
//! This crate performs no I/O.

mod call;
mod error;
mod event;
mod recordio;
mod resources;
mod task;

pub use call::*;
pub use error::MesosError;
pub use event::*;
pub use recordio::RecordIoDecoder;
pub use resources::*;
pub use task::*;
