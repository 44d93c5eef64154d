//! # relayd-core
//!
//! Plain data shared by the relayd supervisor and its CLI: stream
//! descriptors and IDs, credential records and their on-disk cache,
//! configuration, state/config paths and the local control protocol.

pub mod cache;
pub mod config;
pub mod paths;
pub mod protocol;
pub mod types;

pub use cache::{CacheError, CredentialCache, LoadOutcome};
pub use config::{ConfigError, GlobalConfig};
pub use types::*;
