// Crate root library declaration and module exports.
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod model;
pub mod notify;
pub mod region;
pub mod source;
pub mod storage;
pub mod sync;

pub use error::SyncError;
pub use sync::SyncManager;
