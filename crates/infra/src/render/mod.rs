//! Template decoding and artifact rendering.
//!
//! A [`TemplateEngine`] decodes the uploaded template once per job and then
//! renders one personalized document per record from that shared, read-only
//! template.

pub mod metrics;
pub mod pdf;

pub use pdf::{PdfTemplate, PdfTemplateEngine};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What kind of file the template upload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// A PDF; its first page is the template
    Document,
    /// A PNG or JPEG placed on a page of its own size
    Image,
}

impl TemplateKind {
    /// `*.pdf` is a document, anything else is treated as an image.
    pub fn from_file_name(name: &str) -> Self {
        if name.to_ascii_lowercase().ends_with(".pdf") {
            Self::Document
        } else {
            Self::Image
        }
    }
}

/// Raw template bytes plus their kind.
#[derive(Debug, Clone)]
pub struct TemplateUpload {
    pub bytes: Vec<u8>,
    pub kind: TemplateKind,
}

impl TemplateUpload {
    pub fn new(bytes: Vec<u8>, kind: TemplateKind) -> Self {
        Self { bytes, kind }
    }
}

/// Where and how large the name is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub font_size: f32,
    /// Left edge of the text; centered horizontally when `None`
    pub x: Option<f32>,
    /// Baseline of the text; centered vertically when `None`
    pub y: Option<f32>,
}

impl RenderOptions {
    pub const DEFAULT_FONT_SIZE: f32 = 30.0;

    /// The configured size, or the default when it is not a positive number.
    pub fn effective_font_size(&self) -> f32 {
        if self.font_size.is_finite() && self.font_size > 0.0 {
            self.font_size
        } else {
            Self::DEFAULT_FONT_SIZE
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            font_size: Self::DEFAULT_FONT_SIZE,
            x: None,
            y: None,
        }
    }
}

/// Template decoding failed; fatal for the job.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("pdf: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("template has no pages")]
    NoPages,
    #[error("malformed template: {0}")]
    Malformed(String),
}

/// Rendering one artifact failed; only that record fails.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("pdf: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("character {0:?} cannot be drawn with the template font")]
    Unencodable(char),
    #[error("malformed template: {0}")]
    Malformed(String),
}

/// Decodes templates and renders personalized artifacts from them.
///
/// `render` must not mutate the template: the scheduler shares one decoded
/// template across every concurrent render of a job.
pub trait TemplateEngine: Send + Sync + 'static {
    type Template: Send + Sync + 'static;

    fn decode(&self, bytes: &[u8], kind: TemplateKind) -> Result<Self::Template, TemplateError>;

    fn render(
        &self,
        template: &Self::Template,
        display_name: &str,
        options: &RenderOptions,
    ) -> Result<Vec<u8>, RenderError>;
}
