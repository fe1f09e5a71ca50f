//! Snapshot persistence in the RDB format.

pub mod crc64;
pub mod rdb;

pub use rdb::{encode, load, load_file};
