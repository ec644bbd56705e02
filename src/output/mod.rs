mod board;
mod extraction;
mod progress;
mod styling;
mod tables;

pub use board::{format_timestamp, print_board};
pub use extraction::print_extraction;
pub use progress::{DownloadProgress, Spinner};
pub use styling::{accent, brand, failure, heading, muted, success, working};

/// Prints the quirrus banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        brand("🌩  quirrus"),
        muted(env!("CARGO_PKG_VERSION")),
        muted("Cirrus CI builds from the command line")
    );
}
