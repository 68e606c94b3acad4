//! Interactive workflow: upload, segment, pick a mask, stylize, composite
//!
//! The [`WorkflowController`] owns everything shared between sessions (models,
//! the mask cache, configuration) and moves a [`Session`] through its stages.
//! Each transition takes the current record by reference and returns a
//! [`Step`]. A transition whose prerequisites are missing redirects instead of
//! failing, and a failing transition leaves the caller's record untouched.

mod session;

pub use session::{ImageInput, Page, SavedImage, Session, Stage, Step};

use crate::cache::ModelCache;
use crate::compositor;
use crate::config::{OutputFormat, SegifyConfig};
use crate::download::{ensure_assets, ModelFetcher, ModelProvisioner};
use crate::error::{Result, SegifyError};
use crate::inference::{BackendFactory, DefaultBackendFactory};
use crate::models::ModelAsset;
use crate::segmentation::{MaskCache, SamMaskGenerator, SegmentationAdapter, Segmenter};
use crate::services::{
    ImageIOService, NoOpProgressReporter, ProcessingStage, ProgressReporter, ProgressTracker,
};
use crate::stylization::{AdainStylizer, Stylizer};
use crate::types::{BlendWeight, MaskCount};
use crate::workspace::TempWorkspace;
use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info as trace_info, instrument};

/// File name stem of the uploaded image inside the workspace
pub const UPLOADED_STEM: &str = "uploaded";

/// File name stem of the stylized image inside the workspace
pub const STYLIZED_STEM: &str = "stylized_mask";

type Slot<T> = Arc<Mutex<Option<Arc<T>>>>;

/// Drives sessions through the workflow
pub struct WorkflowController {
    config: SegifyConfig,
    cache: ModelCache,
    fetcher: Arc<dyn ModelFetcher>,
    factory: Arc<dyn BackendFactory>,
    segmenter: Slot<dyn Segmenter>,
    stylizer: Slot<dyn Stylizer>,
    mask_cache: Arc<MaskCache>,
    reporter: Arc<dyn ProgressReporter>,
    workspace_base: PathBuf,
}

impl WorkflowController {
    /// Create a builder for `config`
    #[must_use]
    pub fn builder(config: SegifyConfig) -> WorkflowControllerBuilder {
        WorkflowControllerBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &SegifyConfig {
        &self.config
    }

    #[must_use]
    pub fn model_cache(&self) -> &ModelCache {
        &self.cache
    }

    #[must_use]
    pub fn mask_cache(&self) -> &Arc<MaskCache> {
        &self.mask_cache
    }

    /// Page that can actually be shown for `session` when `requested` is asked for
    #[must_use]
    pub fn navigate(&self, session: &Session, requested: Page) -> Page {
        match requested {
            Page::Landing => Page::Landing,
            Page::Input => {
                if session.workspace.is_some() {
                    Page::Input
                } else {
                    Page::Landing
                }
            },
            Page::Segment => {
                if session.uploaded.is_some() && session.mask_count.is_some() {
                    Page::Segment
                } else {
                    self.navigate(session, Page::Input)
                }
            },
            Page::Style => {
                if session.mask.is_some() {
                    Page::Style
                } else {
                    self.navigate(session, Page::Segment)
                }
            },
        }
    }

    /// Create the session workspace and move to the input page
    ///
    /// Each session gets `<workspace_name>/<session id>` under the workspace
    /// base. Calling this again on a session that already has a workspace is
    /// a no-op.
    ///
    /// # Errors
    /// - The workspace directory cannot be created
    #[instrument(skip_all, fields(session = %session.id()))]
    pub fn begin(&self, session: &Session) -> Result<Step> {
        if session.workspace.is_some() {
            return Ok(Step::Advanced(session.clone()));
        }

        let root = self.workspace_base.join(&self.config.workspace_name);
        let workspace = TempWorkspace::create_in(&root, &session.id().to_string())?;
        log::info!("📁 Workspace ready at {}", workspace.path().display());
        Ok(Step::Advanced(Session {
            stage: Stage::Input,
            workspace: Some(Arc::new(workspace)),
            ..session.clone()
        }))
    }

    /// Store the uploaded image and the number of masks to show
    ///
    /// Replaces any earlier upload and discards everything derived from it.
    ///
    /// # Errors
    /// - The image cannot be written to the workspace
    #[instrument(skip_all, fields(session = %session.id(), ext = upload.extension(), masks = mask_count.get()))]
    pub fn upload(&self, session: &Session, upload: &ImageInput, mask_count: MaskCount) -> Result<Step> {
        if session.workspace.is_none() {
            return Ok(self.redirect(session, Page::Input));
        }
        if upload.is_empty() {
            log::warn!("Ignoring upload with no pixels");
            return Ok(Step::Redirected {
                session: session.clone(),
                page: Page::Input,
            });
        }

        let mut tracker = ProgressTracker::new(Arc::clone(&self.reporter), "upload");
        tracker.report_stage(ProcessingStage::ImageSaving);
        let path = session
            .require_workspace()?
            .file_path(&format!("{UPLOADED_STEM}.{}", upload.extension()));
        if let Err(e) = self.write_rgb(upload.image(), &path) {
            tracker.report_error(&e.to_string());
            return Err(e);
        }
        tracker.complete();

        log::info!(
            "📥 Uploaded {}x{} image, showing up to {} masks",
            upload.image().width(),
            upload.image().height(),
            mask_count.get()
        );
        Ok(Step::Advanced(Session {
            stage: Stage::InputReady,
            uploaded: Some(SavedImage {
                image: Arc::clone(upload.image()),
                path,
            }),
            mask_count: Some(mask_count),
            ..session.cleared_after_upload()
        }))
    }

    /// Generate the candidate masks for the uploaded image
    ///
    /// # Errors
    /// - Model provisioning, loading or inference fails
    #[instrument(skip_all, fields(session = %session.id()))]
    pub async fn segment(&self, session: &Session) -> Result<Step> {
        let (Some(uploaded), Some(mask_count)) = (&session.uploaded, session.mask_count) else {
            return Ok(self.redirect(session, Page::Segment));
        };

        let mut tracker = ProgressTracker::new(Arc::clone(&self.reporter), "segmentation");
        let result = self
            .run_segmentation(&mut tracker, Arc::clone(&uploaded.image), mask_count)
            .await;
        let candidates = match result {
            Ok(candidates) => candidates,
            Err(e) => {
                tracker.report_error(&e.to_string());
                return Err(e);
            },
        };
        tracker.complete();

        trace_info!(
            candidates = candidates.len(),
            areas = ?candidates.areas(),
            "segmentation complete"
        );
        Ok(Step::Advanced(Session {
            stage: Stage::Segmented,
            candidates: Some(candidates),
            ..session.cleared_after_segmentation()
        }))
    }

    /// Select the candidate at zero-based `rank`
    ///
    /// # Errors
    /// - `rank` is not below the number of candidates
    #[instrument(skip_all, fields(session = %session.id(), rank = rank))]
    pub fn choose_mask(&self, session: &Session, rank: usize) -> Result<Step> {
        let Some(candidates) = &session.candidates else {
            return Ok(self.redirect(session, Page::Segment));
        };
        let mask = candidates
            .get(rank)
            .ok_or(SegifyError::InvalidSelection {
                rank,
                available: candidates.len(),
            })?;

        log::info!("🎯 Selected Segment {} ({} pixels)", rank + 1, mask.area());
        Ok(Step::Advanced(Session {
            stage: Stage::MaskChosen,
            selected_rank: Some(rank),
            mask: Some(Arc::clone(mask)),
            ..session.cleared_after_selection()
        }))
    }

    /// Stylize the uploaded image and composite it through the selected mask
    ///
    /// # Errors
    /// - Model provisioning, loading or inference fails
    /// - The stylized image cannot be written to the workspace
    #[instrument(skip_all, fields(session = %session.id(), weight = weight.value()))]
    pub async fn apply_style(
        &self,
        session: &Session,
        style: &ImageInput,
        weight: BlendWeight,
    ) -> Result<Step> {
        let (Some(uploaded), Some(mask)) = (&session.uploaded, &session.mask) else {
            return Ok(self.redirect(session, Page::Style));
        };
        let path = session
            .require_workspace()?
            .file_path(&format!("{STYLIZED_STEM}.{}", style.extension()));

        let mut tracker = ProgressTracker::new(Arc::clone(&self.reporter), "stylization");
        let result = self
            .run_stylization(&mut tracker, uploaded, mask, style, weight, &path)
            .await;
        let (stylized, composited) = match result {
            Ok(images) => images,
            Err(e) => {
                tracker.report_error(&e.to_string());
                return Err(e);
            },
        };
        tracker.complete();

        log::info!(
            "🎨 Styled segment with weight {:.2} ({}x{} result)",
            weight.value(),
            composited.width(),
            composited.height()
        );
        Ok(Step::Advanced(Session {
            stage: Stage::Styled,
            style: Some(Arc::clone(style.image())),
            blend_weight: Some(weight),
            stylized: Some(SavedImage {
                image: Arc::new(stylized),
                path,
            }),
            result: Some(Arc::new(composited)),
            ..session.clone()
        }))
    }

    /// Write the composited result to `path`
    ///
    /// The format follows the extension of `path`, falling back to the
    /// configured output format.
    ///
    /// # Errors
    /// - The session has no result yet
    /// - Encoding or writing fails
    pub fn export_result(&self, session: &Session, path: &Path) -> Result<PathBuf> {
        let result = session
            .result
            .as_ref()
            .ok_or_else(|| SegifyError::processing("No stylized result to export"))?;
        let format = OutputFormat::from_path(path).unwrap_or(self.config.output_format);
        let path = if OutputFormat::from_path(path).is_some() {
            path.to_path_buf()
        } else {
            path.with_extension(format.extension())
        };
        ImageIOService::save_image(
            &DynamicImage::ImageRgba8((**result).clone()),
            &path,
            format,
            self.config.jpeg_quality,
        )?;
        log::info!("💾 Saved result to {}", path.display());
        Ok(path)
    }

    /// Delete the workspace and start over from the landing page
    ///
    /// # Errors
    /// - The workspace directory cannot be removed
    #[instrument(skip_all, fields(session = %session.id()))]
    pub fn exit(&self, session: &Session) -> Result<Step> {
        if let Some(workspace) = &session.workspace {
            let path = workspace.path().to_path_buf();
            TempWorkspace::clone(workspace).destroy()?;
            log::info!("🧹 Removed workspace {}", path.display());
        }
        Ok(Step::Redirected {
            session: Session::new(),
            page: Page::Landing,
        })
    }

    fn redirect(&self, session: &Session, requested: Page) -> Step {
        let page = self.navigate(session, requested);
        log::debug!("↩️ Redirecting from {requested} to {page} (stage {})", session.stage);
        Step::Redirected {
            session: session.clone(),
            page,
        }
    }

    fn write_rgb(&self, image: &RgbImage, path: &Path) -> Result<()> {
        let format = OutputFormat::from_path(path).unwrap_or(OutputFormat::Png);
        ImageIOService::save_image(
            &DynamicImage::ImageRgb8(image.clone()),
            path,
            format,
            self.config.jpeg_quality,
        )
    }

    /// Owned copies of what model loading needs off the async runtime
    fn loader_parts(&self) -> (Arc<dyn BackendFactory>, SegifyConfig, ModelCache) {
        (
            Arc::clone(&self.factory),
            self.config.clone(),
            self.cache.clone(),
        )
    }

    async fn run_segmentation(
        &self,
        tracker: &mut ProgressTracker,
        image: Arc<RgbImage>,
        mask_count: MaskCount,
    ) -> Result<crate::types::CandidateMasks> {
        tracker.report_stage(ProcessingStage::ModelProvisioning);
        ensure_assets(
            self.fetcher.as_ref(),
            &ModelAsset::SEGMENTATION,
            &self.config,
            &self.cache,
        )
        .await?;

        tracker.report_stage(ProcessingStage::ModelLoading);
        let slot = Arc::clone(&self.segmenter);
        let (factory, config, cache) = self.loader_parts();
        let segmenter = run_blocking("Segmentation model loading", move || {
            get_or_load(&slot, || {
                let generator = SamMaskGenerator::load(factory.as_ref(), &config, &cache)?;
                Ok(Arc::new(generator) as Arc<dyn Segmenter>)
            })
        })
        .await?;

        tracker.report_stage_with_description(
            ProcessingStage::Segmentation,
            format!(
                "Segmenting {}x{} image into up to {} masks",
                image.width(),
                image.height(),
                mask_count.get()
            ),
        );
        let adapter = SegmentationAdapter::new(segmenter, Arc::clone(&self.mask_cache));
        run_blocking("Segmentation", move || adapter.segment(&image, mask_count)).await
    }

    async fn run_stylization(
        &self,
        tracker: &mut ProgressTracker,
        uploaded: &SavedImage,
        mask: &Arc<crate::types::Mask>,
        style: &ImageInput,
        weight: BlendWeight,
        stylized_path: &Path,
    ) -> Result<(RgbImage, image::RgbaImage)> {
        tracker.report_stage(ProcessingStage::ModelProvisioning);
        ensure_assets(
            self.fetcher.as_ref(),
            &ModelAsset::STYLIZATION,
            &self.config,
            &self.cache,
        )
        .await?;

        tracker.report_stage(ProcessingStage::ModelLoading);
        let slot = Arc::clone(&self.stylizer);
        let (factory, config, cache) = self.loader_parts();
        let stylizer = run_blocking("Style model loading", move || {
            get_or_load(&slot, || {
                let stylizer = AdainStylizer::load(factory.as_ref(), &config, &cache)?;
                Ok(Arc::new(stylizer) as Arc<dyn Stylizer>)
            })
        })
        .await?;

        tracker.report_stage_with_description(
            ProcessingStage::Stylization,
            format!("Styling with weight {:.2}", weight.value()),
        );
        let content = Arc::clone(&uploaded.image);
        let style_image = Arc::clone(style.image());
        let stylized = run_blocking("Stylization", move || {
            stylizer.stylize(&content, &style_image, weight.value())
        })
        .await?;

        tracker.report_stage(ProcessingStage::FileSaving);
        self.write_rgb(&stylized, stylized_path)?;

        tracker.report_stage(ProcessingStage::Compositing);
        let composited = compositor::combine(&uploaded.image, &stylized, mask)?;
        Ok((stylized, composited))
    }
}

impl std::fmt::Debug for WorkflowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowController")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("workspace_base", &self.workspace_base)
            .finish_non_exhaustive()
    }
}

/// Run blocking model work on tokio's blocking pool
async fn run_blocking<T, F>(task: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SegifyError::internal(format!("{task} task failed: {e}")))?
}

fn get_or_load<T: ?Sized>(
    slot: &Slot<T>,
    load: impl FnOnce() -> Result<Arc<T>>,
) -> Result<Arc<T>> {
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(instance) = guard.as_ref() {
        return Ok(Arc::clone(instance));
    }
    let instance = load()?;
    *guard = Some(Arc::clone(&instance));
    Ok(instance)
}

/// Builder for [`WorkflowController`]
///
/// Everything except the configuration has a default: the HTTP provisioner,
/// backends from [`DefaultBackendFactory`], models loaded on first use, no
/// progress output and the current working directory as workspace base.
pub struct WorkflowControllerBuilder {
    config: SegifyConfig,
    workspace_base: Option<PathBuf>,
    fetcher: Option<Arc<dyn ModelFetcher>>,
    factory: Option<Arc<dyn BackendFactory>>,
    segmenter: Option<Arc<dyn Segmenter>>,
    stylizer: Option<Arc<dyn Stylizer>>,
    reporter: Option<Arc<dyn ProgressReporter>>,
    mask_cache: Option<Arc<MaskCache>>,
}

impl WorkflowControllerBuilder {
    #[must_use]
    pub fn new(config: SegifyConfig) -> Self {
        Self {
            config,
            workspace_base: None,
            fetcher: None,
            factory: None,
            segmenter: None,
            stylizer: None,
            reporter: None,
            mask_cache: None,
        }
    }

    /// Directory the workspace is created in
    #[must_use]
    pub fn workspace_base<P: Into<PathBuf>>(mut self, base: P) -> Self {
        self.workspace_base = Some(base.into());
        self
    }

    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn ModelFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn backend_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Use `segmenter` instead of loading the SAM graphs
    #[must_use]
    pub fn segmenter(mut self, segmenter: Arc<dyn Segmenter>) -> Self {
        self.segmenter = Some(segmenter);
        self
    }

    /// Use `stylizer` instead of loading the AdaIN graphs
    #[must_use]
    pub fn stylizer(mut self, stylizer: Arc<dyn Stylizer>) -> Self {
        self.stylizer = Some(stylizer);
        self
    }

    #[must_use]
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Share a mask cache with other controllers
    #[must_use]
    pub fn mask_cache(mut self, cache: Arc<MaskCache>) -> Self {
        self.mask_cache = Some(cache);
        self
    }

    /// Validate the configuration and build the controller
    ///
    /// # Errors
    /// - Invalid configuration
    /// - The model cache directory cannot be created
    /// - The working directory cannot be resolved
    /// - The HTTP client cannot be built
    pub fn build(self) -> Result<WorkflowController> {
        self.config.validate()?;
        let cache = ModelCache::new(&self.config)?;

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(ModelProvisioner::new(self.config.show_download_progress)?),
        };
        let workspace_base = match self.workspace_base {
            Some(base) => base,
            None => std::env::current_dir()
                .map_err(|e| SegifyError::file_io_error("resolve working directory", ".", &e))?,
        };
        let mask_cache = self.mask_cache.unwrap_or_else(|| {
            Arc::new(MaskCache::new(Duration::from_secs(
                self.config.segmentation.cache_ttl_secs,
            )))
        });

        Ok(WorkflowController {
            cache,
            fetcher,
            factory: self.factory.unwrap_or_else(|| Arc::new(DefaultBackendFactory)),
            segmenter: Arc::new(Mutex::new(self.segmenter)),
            stylizer: Arc::new(Mutex::new(self.stylizer)),
            mask_cache,
            reporter: self.reporter.unwrap_or_else(|| Arc::new(NoOpProgressReporter)),
            workspace_base,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::ProvisionOutcome;
    use crate::types::Mask;
    use async_trait::async_trait;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelFetcher for CountingFetcher {
        async fn ensure(&self, _: &str, _: &str, _: &Path) -> Result<ProvisionOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProvisionOutcome::already_exists())
        }
    }

    struct RefusingFetcher;

    #[async_trait]
    impl ModelFetcher for RefusingFetcher {
        async fn ensure(&self, _: &str, _: &str, _: &Path) -> Result<ProvisionOutcome> {
            Ok(ProvisionOutcome::rejected(reqwest::StatusCode::NOT_FOUND))
        }
    }

    /// Left third, full image and top row, in that generator order
    struct BandSegmenter {
        calls: AtomicUsize,
    }

    impl Segmenter for BandSegmenter {
        fn generate(&self, image: &RgbImage) -> Result<Vec<Mask>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (w, h) = image.dimensions();
            Ok(vec![
                Mask::from_fn(w, h, |x, _| x < w / 3),
                Mask::filled(w, h, true),
                Mask::from_fn(w, h, |_, y| y == 0),
            ])
        }

        fn model_id(&self) -> String {
            "bands".to_string()
        }
    }

    /// Returns a solid image at half the content size
    struct SolidStylizer;

    impl Stylizer for SolidStylizer {
        fn stylize(&self, content: &RgbImage, _: &RgbImage, alpha: f32) -> Result<RgbImage> {
            assert!((0.0..=1.0).contains(&alpha));
            Ok(RgbImage::from_pixel(
                (content.width() / 2).max(1),
                (content.height() / 2).max(1),
                Rgb([0, 200, 0]),
            ))
        }
    }

    struct Harness {
        _models: TempDir,
        base: TempDir,
        controller: WorkflowController,
        fetcher: Arc<CountingFetcher>,
        segmenter: Arc<BandSegmenter>,
    }

    fn harness() -> Harness {
        let models = TempDir::new().unwrap();
        let base = TempDir::new().unwrap();
        let mut builder = SegifyConfig::builder().models_dir(models.path());
        for asset in ModelAsset::ALL {
            builder = builder.model_url(asset.id(), format!("http://models.test/{}", asset.file_name()));
        }
        let fetcher = Arc::new(CountingFetcher::default());
        let segmenter = Arc::new(BandSegmenter {
            calls: AtomicUsize::new(0),
        });
        let controller = WorkflowController::builder(builder.build().unwrap())
            .workspace_base(base.path())
            .fetcher(fetcher.clone())
            .segmenter(segmenter.clone())
            .stylizer(Arc::new(SolidStylizer))
            .build()
            .unwrap();
        Harness {
            _models: models,
            base,
            controller,
            fetcher,
            segmenter,
        }
    }

    fn upload_input() -> ImageInput {
        ImageInput::from_rgb(RgbImage::from_pixel(12, 9, Rgb([90, 90, 90])), "png").unwrap()
    }

    async fn segmented(h: &Harness) -> Session {
        let session = h.controller.begin(&Session::new()).unwrap().into_session();
        let session = h
            .controller
            .upload(&session, &upload_input(), MaskCount::new(2).unwrap())
            .unwrap()
            .into_session();
        h.controller.segment(&session).await.unwrap().into_session()
    }

    #[test]
    fn test_begin_is_idempotent() {
        let h = harness();
        let first = h.controller.begin(&Session::new()).unwrap().into_session();
        assert_eq!(first.stage(), Stage::Input);
        let workspace = first.workspace().unwrap().path().to_path_buf();
        assert_eq!(
            workspace,
            h.base.path().join("temp_images").join(first.id().to_string())
        );

        let again = h.controller.begin(&first).unwrap().into_session();
        assert_eq!(again.workspace().unwrap().path(), workspace);
        assert_eq!(again.id(), first.id());
    }

    #[test]
    fn test_navigation_redirects() {
        let h = harness();
        let fresh = Session::new();
        assert_eq!(h.controller.navigate(&fresh, Page::Input), Page::Landing);
        assert_eq!(h.controller.navigate(&fresh, Page::Style), Page::Landing);

        let started = h.controller.begin(&fresh).unwrap().into_session();
        assert_eq!(h.controller.navigate(&started, Page::Segment), Page::Input);
        assert_eq!(h.controller.navigate(&started, Page::Style), Page::Input);
    }

    #[test]
    fn test_upload_requires_workspace_and_pixels() {
        let h = harness();
        let count = MaskCount::new(3).unwrap();
        let step = h.controller.upload(&Session::new(), &upload_input(), count).unwrap();
        assert_eq!(step.redirected_to(), Some(Page::Landing));

        let started = h.controller.begin(&Session::new()).unwrap().into_session();
        let empty = ImageInput::from_rgb(RgbImage::new(0, 0), "png").unwrap();
        let step = h.controller.upload(&started, &empty, count).unwrap();
        assert_eq!(step.redirected_to(), Some(Page::Input));
        assert!(step.session().uploaded_image().is_none());
    }

    #[test]
    fn test_upload_saves_into_workspace() {
        let h = harness();
        let started = h.controller.begin(&Session::new()).unwrap().into_session();
        let input = ImageInput::from_rgb(RgbImage::new(4, 4), "jpg").unwrap();
        let session = h
            .controller
            .upload(&started, &input, MaskCount::new(1).unwrap())
            .unwrap()
            .into_session();

        assert_eq!(session.stage(), Stage::InputReady);
        let path = session.uploaded_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "uploaded.jpg");
        assert!(path.exists());
        assert_eq!(h.controller.navigate(&session, Page::Segment), Page::Segment);
    }

    #[tokio::test]
    async fn test_segment_ranks_and_truncates() {
        let h = harness();
        let session = segmented(&h).await;

        let candidates = session.candidates().unwrap();
        assert_eq!(session.stage(), Stage::Segmented);
        assert_eq!(candidates.areas(), vec![108, 36]);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_segment_reuses_cached_masks() {
        let h = harness();
        let session = segmented(&h).await;
        let again = h.controller.segment(&session).await.unwrap().into_session();
        assert_eq!(again.candidates().unwrap().len(), 2);
        assert_eq!(h.segmenter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_segment_without_upload_redirects() {
        let h = harness();
        let started = h.controller.begin(&Session::new()).unwrap().into_session();
        let step = h.controller.segment(&started).await.unwrap();
        assert_eq!(step.redirected_to(), Some(Page::Input));
        assert_eq!(h.segmenter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_choose_mask_bounds() {
        let h = harness();
        let session = segmented(&h).await;

        let err = h.controller.choose_mask(&session, 2).unwrap_err();
        assert!(matches!(
            err,
            SegifyError::InvalidSelection {
                rank: 2,
                available: 2
            }
        ));
        assert_eq!(session.stage(), Stage::Segmented);

        let chosen = h.controller.choose_mask(&session, 1).unwrap().into_session();
        assert_eq!(chosen.stage(), Stage::MaskChosen);
        assert_eq!(chosen.selected_rank(), Some(1));
        assert_eq!(chosen.selected_mask().unwrap().area(), 36);
    }

    #[tokio::test]
    async fn test_apply_style_composites_at_original_size() {
        let h = harness();
        let session = segmented(&h).await;
        let chosen = h.controller.choose_mask(&session, 1).unwrap().into_session();

        let style = ImageInput::from_rgb(RgbImage::from_pixel(5, 5, Rgb([1, 2, 3])), "jpeg").unwrap();
        let styled = h
            .controller
            .apply_style(&chosen, &style, BlendWeight::new(0.5).unwrap())
            .await
            .unwrap()
            .into_session();

        assert_eq!(styled.stage(), Stage::Styled);
        assert_eq!(styled.stylized_path().unwrap().file_name().unwrap(), "stylized_mask.jpeg");
        let result = styled.result().unwrap();
        assert_eq!(result.dimensions(), (12, 9));
        let untouched = result.get_pixel(11, 8).0;
        assert!(untouched[..3].iter().all(|&c| c.abs_diff(90) <= 3));
        assert_eq!(untouched[3], 255);
        assert_eq!(result.get_pixel(0, 0).0[1], 200);
    }

    #[tokio::test]
    async fn test_apply_style_without_mask_redirects() {
        let h = harness();
        let session = segmented(&h).await;
        let style = upload_input();
        let step = h
            .controller
            .apply_style(&session, &style, BlendWeight::FULL)
            .await
            .unwrap();
        assert_eq!(step.redirected_to(), Some(Page::Segment));
    }

    #[tokio::test]
    async fn test_provisioning_failure_keeps_session() {
        let models = TempDir::new().unwrap();
        let base = TempDir::new().unwrap();
        let config = SegifyConfig::builder()
            .models_dir(models.path())
            .model_url("sam_encoder", "http://models.test/missing.onnx")
            .build()
            .unwrap();
        let controller = WorkflowController::builder(config)
            .workspace_base(base.path())
            .fetcher(Arc::new(RefusingFetcher))
            .segmenter(Arc::new(BandSegmenter {
                calls: AtomicUsize::new(0),
            }))
            .build()
            .unwrap();

        let session = controller.begin(&Session::new()).unwrap().into_session();
        let session = controller
            .upload(&session, &upload_input(), MaskCount::new(2).unwrap())
            .unwrap()
            .into_session();
        let err = controller.segment(&session).await.unwrap_err();
        assert!(matches!(err, SegifyError::Provisioning { .. }));
        assert_eq!(session.stage(), Stage::InputReady);
    }

    /// Records the thread each backend is requested on, then fails the load
    #[derive(Default)]
    struct ThreadRecordingFactory {
        threads: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl BackendFactory for ThreadRecordingFactory {
        fn create_backend(
            &self,
            _backend_type: crate::config::BackendType,
            asset: ModelAsset,
            _cache: &ModelCache,
        ) -> Result<Box<dyn crate::inference::InferenceBackend>> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            Err(SegifyError::model(format!("{asset} unavailable")))
        }

        fn available_backends(&self) -> Vec<crate::config::BackendType> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_models_load_off_the_async_thread() {
        let models = TempDir::new().unwrap();
        let base = TempDir::new().unwrap();
        let mut builder = SegifyConfig::builder().models_dir(models.path());
        for asset in ModelAsset::ALL {
            builder = builder.model_url(asset.id(), format!("http://models.test/{}", asset.file_name()));
        }
        let factory = Arc::new(ThreadRecordingFactory::default());
        let controller = WorkflowController::builder(builder.build().unwrap())
            .workspace_base(base.path())
            .fetcher(Arc::new(CountingFetcher::default()))
            .backend_factory(factory.clone())
            .build()
            .unwrap();

        let session = controller.begin(&Session::new()).unwrap().into_session();
        let session = controller
            .upload(&session, &upload_input(), MaskCount::new(2).unwrap())
            .unwrap()
            .into_session();
        let err = controller.segment(&session).await.unwrap_err();
        assert!(matches!(err, SegifyError::Model(_)), "{err:?}");

        // A failed load leaves the slot empty, so the next attempt loads again
        assert!(controller.segment(&session).await.is_err());

        let threads = factory.threads.lock().unwrap();
        assert_eq!(threads.len(), 2);
        let async_thread = std::thread::current().id();
        assert!(threads.iter().all(|id| *id != async_thread));
    }

    #[tokio::test]
    async fn test_exit_removes_workspace() {
        let h = harness();
        let session = segmented(&h).await;
        let workspace = session.workspace().unwrap().path().to_path_buf();
        assert!(workspace.exists());

        let step = h.controller.exit(&session).unwrap();
        assert_eq!(step.redirected_to(), Some(Page::Landing));
        assert!(!workspace.exists());
        let fresh = step.into_session();
        assert_ne!(fresh.id(), session.id());
        assert_eq!(fresh.stage(), Stage::Landing);
        assert!(fresh.candidates().is_none());
    }

    #[tokio::test]
    async fn test_export_result() {
        let h = harness();
        let session = segmented(&h).await;
        assert!(h.controller.export_result(&session, &h.base.path().join("x.png")).is_err());

        let chosen = h.controller.choose_mask(&session, 0).unwrap().into_session();
        let styled = h
            .controller
            .apply_style(&chosen, &upload_input(), BlendWeight::FULL)
            .await
            .unwrap()
            .into_session();
        let out = h
            .controller
            .export_result(&styled, &h.base.path().join("result"))
            .unwrap();
        assert_eq!(out.extension().unwrap(), "png");
        assert!(out.exists());
    }
}
