//! Client for the Cirrus CI GraphQL API and its log download endpoint.

mod builds;
mod client;
mod logs;
pub mod queries;
pub mod types;

pub use client::{CirrusClient, ClientSettings, DEFAULT_API_URL};
pub use logs::{log_file_name, DownloadReport, LogTarget};
