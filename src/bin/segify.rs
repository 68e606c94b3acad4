//! Segify CLI
//!
//! Segments an image, lets the user pick a segment and restyles only that
//! segment with a reference style image.

#[cfg(feature = "cli")]
use segify::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
