pub mod config;
mod error;
pub mod logger;
pub mod policy;
pub mod server;
pub mod store;
pub mod stream;
pub mod tail;
mod writer;

pub use config::Config;
pub use error::{TailError, TailErrorKind};
pub use logger::{LogSink, LoggerConfig, ServerLogger};
pub use policy::{BackupFile, BackupPattern, RotationPolicy};
pub use server::ControlServer;
pub use stream::{StreamMessage, tail_messages};
pub use tail::{SessionState, TailCursor, TailSession};
pub use writer::{RotatingFile, RotatingFileBuilder, RotationEvent};
