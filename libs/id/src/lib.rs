//! # tierd-id
//!
//! Typed identifiers for the objects the cluster manager hands out.
//!
//! ## Design Principles
//!
//! - IDs are opaque strings assigned by the cluster manager (or generated
//!   locally for tasks); the scheduler never interprets their contents
//! - IDs are typed so that an agent ID can never be passed where a task ID
//!   is expected
//! - On the wire every ID is an object with a single `value` field:
//!   `{"value": "20240101-000000-0100007F-5050-1234-0000"}`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

#[doc(hidden)]
pub use macros::__private;
