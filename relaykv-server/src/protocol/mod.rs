//! RESP wire protocol: reply frames, commands and a buffered connection.
//!
//! Client requests and the replication stream share the same framing, an
//! array of bulk strings, so both roles reuse this module unchanged.

pub mod command;
pub mod connection;
pub mod resp;

pub use command::Command;
pub use connection::Connection;
pub use resp::{Frame, parse_command, parse_frame};
