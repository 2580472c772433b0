//! Binary wire protocol
//!
//! A compact tagged-field encoding with explicit field numbers. Unknown
//! fields are skipped on read so older peers tolerate newer payloads.

pub mod messages;
pub mod wire;
