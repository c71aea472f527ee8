//! Domain types: position records and connection session state.
//!
//! Nothing in this module touches the wire format directly.  The codec in
//! [`crate::protocol`] produces these values; the gateway consumes them.

pub mod record;
pub mod session;
