//! snapshot-bucket: fetch an image on a timer and archive every snapshot into
//! a Backblaze B2 bucket.
//!
//! The binary wires these modules together in [`cli::run`]: configuration is
//! validated first, a [`storage::B2Session`] resolves the bucket once, and the
//! [`snapshot::Snapshotter`] loop runs until [`shutdown::Shutdown`] fires.

pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod load_config;
pub mod shutdown;
pub mod snapshot;
pub mod storage;
pub mod version;

pub use cli::{run, Cli};
