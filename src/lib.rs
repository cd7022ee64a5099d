pub mod config;
pub mod core;
pub mod error;
pub mod logging;

pub use config::{CompareMode, PairConfigFile, SyncOptions, SyncPair};
pub use core::{SyncEngine, SyncReport};
pub use error::{Result, SyncError};
pub use logging::{LogSink, LogSinkConfig, LogSinkGuard, LogTarget};
