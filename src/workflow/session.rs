//! Per-user workflow record
//!
//! A [`Session`] is never mutated in place: each controller transition
//! returns a new record. Images and masks are shared through `Arc`, so
//! cloning a session is cheap.

use crate::error::{Result, SegifyError};
use crate::services::ImageIOService;
use crate::types::{BlendWeight, CandidateMasks, Mask, MaskCount};
use crate::workspace::TempWorkspace;
use chrono::{DateTime, Utc};
use image::{DynamicImage, RgbImage, RgbaImage};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Nothing started yet
    Landing,
    /// Workspace ready, waiting for an image
    Input,
    /// Image uploaded and mask count chosen
    InputReady,
    /// Candidate masks available
    Segmented,
    /// One candidate selected
    MaskChosen,
    /// Stylized and composited result available
    Styled,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Landing => "landing",
            Stage::Input => "input",
            Stage::InputReady => "input-ready",
            Stage::Segmented => "segmented",
            Stage::MaskChosen => "mask-chosen",
            Stage::Styled => "styled",
        };
        write!(f, "{name}")
    }
}

/// User-facing pages of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Page {
    Landing,
    Input,
    Segment,
    Style,
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Page::Landing => "landing",
            Page::Input => "input",
            Page::Segment => "segment",
            Page::Style => "style",
        };
        write!(f, "{name}")
    }
}

/// A decoded image together with the extension it was supplied with
#[derive(Clone)]
pub struct ImageInput {
    image: Arc<RgbImage>,
    extension: String,
}

impl ImageInput {
    /// Wrap a decoded image; `extension` must be png, jpg or jpeg
    ///
    /// # Errors
    /// - Unsupported extension
    pub fn new(image: &DynamicImage, extension: &str) -> Result<Self> {
        Self::from_rgb(image.to_rgb8(), extension)
    }

    /// # Errors
    /// - Unsupported extension
    pub fn from_rgb(image: RgbImage, extension: &str) -> Result<Self> {
        let extension = ImageIOService::extension(format!("image.{extension}"))?;
        Ok(Self {
            image: Arc::new(image),
            extension,
        })
    }

    /// Load an image file, keeping its extension
    ///
    /// # Errors
    /// - Unsupported extension, missing file or undecodable content
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = ImageIOService::extension(path)?;
        let image = ImageIOService::load_image(path)?;
        Ok(Self {
            image: Arc::new(image.to_rgb8()),
            extension,
        })
    }

    #[must_use]
    pub fn image(&self) -> &Arc<RgbImage> {
        &self.image
    }

    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// True when the image has no pixels
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}

impl fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageInput")
            .field("dimensions", &self.image.dimensions())
            .field("extension", &self.extension)
            .finish()
    }
}

/// An image that has been written into the workspace
#[derive(Debug, Clone)]
pub struct SavedImage {
    pub image: Arc<RgbImage>,
    pub path: PathBuf,
}

/// One user's workflow instance
#[derive(Debug, Clone)]
pub struct Session {
    pub(super) id: Uuid,
    pub(super) started_at: DateTime<Utc>,
    pub(super) stage: Stage,
    pub(super) workspace: Option<Arc<TempWorkspace>>,
    pub(super) uploaded: Option<SavedImage>,
    pub(super) mask_count: Option<MaskCount>,
    pub(super) candidates: Option<CandidateMasks>,
    pub(super) selected_rank: Option<usize>,
    pub(super) mask: Option<Arc<Mask>>,
    pub(super) style: Option<Arc<RgbImage>>,
    pub(super) blend_weight: Option<BlendWeight>,
    pub(super) stylized: Option<SavedImage>,
    pub(super) result: Option<Arc<RgbaImage>>,
}

impl Session {
    /// Fresh session on the landing page
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            stage: Stage::Landing,
            workspace: None,
            uploaded: None,
            mask_count: None,
            candidates: None,
            selected_rank: None,
            mask: None,
            style: None,
            blend_weight: None,
            stylized: None,
            result: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[must_use]
    pub fn workspace(&self) -> Option<&TempWorkspace> {
        self.workspace.as_deref()
    }

    #[must_use]
    pub fn uploaded_image(&self) -> Option<&Arc<RgbImage>> {
        self.uploaded.as_ref().map(|saved| &saved.image)
    }

    /// Workspace copy of the uploaded image
    #[must_use]
    pub fn uploaded_path(&self) -> Option<&Path> {
        self.uploaded.as_ref().map(|saved| saved.path.as_path())
    }

    #[must_use]
    pub fn mask_count(&self) -> Option<MaskCount> {
        self.mask_count
    }

    #[must_use]
    pub fn candidates(&self) -> Option<&CandidateMasks> {
        self.candidates.as_ref()
    }

    #[must_use]
    pub fn selected_rank(&self) -> Option<usize> {
        self.selected_rank
    }

    #[must_use]
    pub fn selected_mask(&self) -> Option<&Arc<Mask>> {
        self.mask.as_ref()
    }

    #[must_use]
    pub fn style_image(&self) -> Option<&Arc<RgbImage>> {
        self.style.as_ref()
    }

    #[must_use]
    pub fn blend_weight(&self) -> Option<BlendWeight> {
        self.blend_weight
    }

    #[must_use]
    pub fn stylized_image(&self) -> Option<&Arc<RgbImage>> {
        self.stylized.as_ref().map(|saved| &saved.image)
    }

    /// Workspace copy of the stylized image
    #[must_use]
    pub fn stylized_path(&self) -> Option<&Path> {
        self.stylized.as_ref().map(|saved| saved.path.as_path())
    }

    /// Composited result
    #[must_use]
    pub fn result(&self) -> Option<&Arc<RgbaImage>> {
        self.result.as_ref()
    }

    /// The workspace, or an internal error for records that skipped `begin`
    pub(super) fn require_workspace(&self) -> Result<&TempWorkspace> {
        self.workspace()
            .ok_or_else(|| SegifyError::internal("Session has no workspace"))
    }

    /// Drop everything derived from the uploaded image
    pub(super) fn cleared_after_upload(&self) -> Self {
        Self {
            candidates: None,
            ..self.cleared_after_segmentation()
        }
    }

    /// Drop everything derived from the candidate set
    pub(super) fn cleared_after_segmentation(&self) -> Self {
        Self {
            selected_rank: None,
            mask: None,
            ..self.cleared_after_selection()
        }
    }

    /// Drop the style inputs and results
    pub(super) fn cleared_after_selection(&self) -> Self {
        Self {
            style: None,
            blend_weight: None,
            stylized: None,
            result: None,
            ..self.clone()
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a controller transition
#[derive(Debug, Clone)]
pub enum Step {
    /// The transition ran; the new record
    Advanced(Session),
    /// A prerequisite was missing; the unchanged record and the page to show
    Redirected { session: Session, page: Page },
}

impl Step {
    #[must_use]
    pub fn session(&self) -> &Session {
        match self {
            Step::Advanced(session) | Step::Redirected { session, .. } => session,
        }
    }

    #[must_use]
    pub fn into_session(self) -> Session {
        match self {
            Step::Advanced(session) | Step::Redirected { session, .. } => session,
        }
    }

    /// Page redirected to, if the transition did not run
    #[must_use]
    pub fn redirected_to(&self) -> Option<Page> {
        match self {
            Step::Advanced(_) => None,
            Step::Redirected { page, .. } => Some(*page),
        }
    }

    #[must_use]
    pub fn is_advanced(&self) -> bool {
        matches!(self, Step::Advanced(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_on_landing() {
        let a = Session::new();
        let b = Session::new();
        assert_eq!(a.stage(), Stage::Landing);
        assert_ne!(a.id(), b.id());
        assert!(a.workspace().is_none());
        assert!(a.result().is_none());
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Landing < Stage::Input);
        assert!(Stage::MaskChosen < Stage::Styled);
        assert_eq!(Stage::InputReady.to_string(), "input-ready");
    }

    #[test]
    fn test_image_input_extension_validation() {
        let image = DynamicImage::new_rgb8(2, 2);
        assert_eq!(ImageInput::new(&image, "JPEG").unwrap().extension(), "jpeg");
        assert!(ImageInput::new(&image, "gif").is_err());
        assert!(ImageInput::from_rgb(RgbImage::new(0, 0), "png")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_step_accessors() {
        let session = Session::new();
        let step = Step::Redirected {
            session: session.clone(),
            page: Page::Input,
        };
        assert_eq!(step.redirected_to(), Some(Page::Input));
        assert!(!step.is_advanced());
        assert_eq!(step.into_session().id(), session.id());
    }
}
