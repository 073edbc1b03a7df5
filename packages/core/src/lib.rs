//! Shared definitions for the p2shim host layer.
//!
//! Everything the guest can observe as a typed result lives here:
//!
//! - [`ErrorCode`]: the closed filesystem error enumeration
//! - [`StreamError`] / [`IoError`]: stream failures
//! - [`Datetime`]: seconds + nanoseconds since the Unix epoch
//!
//! Host-side failures (lost messages, thread startup) are not representable
//! with these types. They belong to the bridge and runtime crates and never
//! cross into guest-visible control flow.

mod error;
mod stream;
mod time;

pub use error::ErrorCode;
pub use stream::{filesystem_error_code, IoError, StreamError, StreamId};
pub use time::Datetime;
