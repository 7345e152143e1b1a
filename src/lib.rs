//! `contact_sync`: export/import reconciliation between address-book accounts.
//!
//! The export side snapshots a curated set of contact groups into a
//! rectangular cell grid. The import side applies that grid to another
//! account so it converges on the source.

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod groups;
pub mod import;
pub mod lock;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod photo;
pub mod sheet;
pub mod store;
pub mod util;

pub use error::{ErrorCode, Result, StructuredError, SyncError};
