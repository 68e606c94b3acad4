//! Progress reporting service
//!
//! Long workflow steps (model provisioning, segmentation, stylization) block
//! the session. Reporters surface which stage is running so a frontend can
//! show a busy indicator.

use instant::Instant;
use std::sync::Arc;

#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};

/// Stages of a workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Ensuring model weight files are present
    ModelProvisioning,
    /// Loading model graphs into the inference backend
    ModelLoading,
    /// Saving the uploaded image into the workspace
    ImageSaving,
    /// Generating and ranking candidate masks
    Segmentation,
    /// Running style transfer
    Stylization,
    /// Blending the stylized region into the original
    Compositing,
    /// Writing results to disk
    FileSaving,
    /// Step completed
    Completed,
}

impl ProcessingStage {
    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::ModelProvisioning => "Checking model files",
            ProcessingStage::ModelLoading => "Loading models",
            ProcessingStage::ImageSaving => "Saving uploaded image",
            ProcessingStage::Segmentation => "Performing segmentation",
            ProcessingStage::Stylization => "Styling",
            ProcessingStage::Compositing => "Combining images",
            ProcessingStage::FileSaving => "Saving result",
            ProcessingStage::Completed => "Done",
        }
    }

    /// Get the typical progress percentage for this stage
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            ProcessingStage::ModelProvisioning => 5,
            ProcessingStage::ModelLoading => 15,
            ProcessingStage::ImageSaving => 20,
            ProcessingStage::Segmentation => 60,
            ProcessingStage::Stylization => 70,
            ProcessingStage::Compositing => 90,
            ProcessingStage::FileSaving => 95,
            ProcessingStage::Completed => 100,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current processing stage
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since the step started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self::with_description(stage, stage.description().to_string(), start_time)
    }

    /// Create a progress update with custom description
    #[must_use]
    pub fn with_description(
        stage: ProcessingStage,
        description: String,
        start_time: Instant,
    ) -> Self {
        Self {
            progress: stage.progress_percentage(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
            description,
        }
    }
}

/// Wall-clock summary of a finished step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingTimings {
    /// Step name, e.g. "segmentation"
    pub step: String,
    pub total_ms: u64,
}

/// Trait for reporting progress during workflow steps
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report step completion with final timings
    fn report_completion(&self, timings: ProcessingTimings);

    /// Report an error during processing
    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
#[derive(Debug, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Console progress reporter that logs progress
#[derive(Debug)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// `verbose` adds elapsed times to each line
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        log::info!("✅ {} completed in {}ms", timings.step, timings.total_ms);
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }
}

/// Spinner shown while a step blocks the terminal, one per step
#[cfg(feature = "cli")]
#[derive(Debug, Default)]
pub struct SpinnerProgressReporter {
    bar: std::sync::Mutex<Option<ProgressBar>>,
}

#[cfg(feature = "cli")]
impl SpinnerProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn new_bar() -> ProgressBar {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        bar
    }

    fn take_bar(&self) -> Option<ProgressBar> {
        self.bar
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}

#[cfg(feature = "cli")]
impl ProgressReporter for SpinnerProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        let mut bar = self
            .bar
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        bar.get_or_insert_with(Self::new_bar)
            .set_message(update.description);
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        if let Some(bar) = self.take_bar() {
            bar.finish_and_clear();
        }
        log::info!("✅ {} completed in {}ms", timings.step, timings.total_ms);
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        if let Some(bar) = self.take_bar() {
            bar.abandon();
        }
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }
}

/// Tracks the stages and timing of one workflow step
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    step: String,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
}

impl ProgressTracker {
    /// Start tracking `step`
    #[must_use]
    pub fn new<S: Into<String>>(reporter: Arc<dyn ProgressReporter>, step: S) -> Self {
        Self {
            reporter,
            step: step.into(),
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Create a progress tracker with no-op reporter (for testing/disabled progress)
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Arc::new(NoOpProgressReporter), "step")
    }

    pub fn report_stage(&mut self, stage: ProcessingStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    /// Report progress with custom description
    pub fn report_stage_with_description(&mut self, stage: ProcessingStage, description: String) {
        self.current_stage = Some(stage);
        let update = ProgressUpdate::with_description(stage, description, self.start_time);
        self.reporter.report_progress(update);
    }

    /// Report the step as finished
    pub fn complete(&mut self) {
        self.report_stage(ProcessingStage::Completed);
        self.reporter.report_completion(ProcessingTimings {
            step: self.step.clone(),
            total_ms: self.elapsed_ms(),
        });
    }

    /// Report an error in the current stage
    pub fn report_error(&self, error: &str) {
        let stage = self
            .current_stage
            .unwrap_or(ProcessingStage::ModelProvisioning);
        self.reporter.report_error(stage, error);
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("step", &self.step)
            .field("current_stage", &self.current_stage)
            .finish_non_exhaustive()
    }
}

/// Reporter for the command-line frontend
///
/// A spinner when `show_spinner` is set (and the `cli` feature is enabled),
/// log lines otherwise.
#[must_use]
pub fn create_cli_progress_reporter(
    show_spinner: bool,
    verbose: bool,
) -> Arc<dyn ProgressReporter> {
    #[cfg(feature = "cli")]
    {
        if show_spinner {
            return Arc::new(SpinnerProgressReporter::new());
        }
    }
    #[cfg(not(feature = "cli"))]
    let _ = show_spinner;
    Arc::new(ConsoleProgressReporter::new(verbose))
}
