//! Session module
//!
//! Download and seed coordinators and their status reporting.

pub mod download;
pub mod seed;
pub mod stats;

pub use download::{DownloadSession, Downloader, SwarmState};
pub use seed::{SeedSession, Seeder};
pub use stats::{DownloadStatus, RateEstimator, SeedStatus, SessionState};
