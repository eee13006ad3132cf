pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod platform;
pub mod protocol;
pub mod rotation;
pub mod session;
pub mod state;
pub mod timer;

pub use error::{EngineError, EngineResult, ErrorKind};
