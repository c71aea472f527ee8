//! Network infrastructure: the TCP accept loop and the socket frame reader.

pub mod frame_reader;
pub mod listener;

pub use listener::{bind_listener, run_server, serve};
