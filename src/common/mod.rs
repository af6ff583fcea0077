//! Common utilities and types shared across minicoord

pub mod config;
pub mod error;
pub mod paths;
pub mod utils;

pub use config::{ClientConfig, Config};
pub use error::{Error, ErrorKind, OpKind, Result};
pub use utils::{crc32, jittered, timestamp_now_millis};
