//! Services separating I/O and progress reporting from the workflow

pub mod io;
pub mod progress;

pub use io::ImageIOService;
pub use progress::{
    create_cli_progress_reporter, ConsoleProgressReporter, NoOpProgressReporter,
    ProcessingStage, ProcessingTimings, ProgressReporter, ProgressTracker, ProgressUpdate,
};
#[cfg(feature = "cli")]
pub use progress::SpinnerProgressReporter;
