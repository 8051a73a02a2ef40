use axum::extract::Multipart;
use axum::http::StatusCode;
use serde::Serialize;

use certdrop_infra::jobs::{BatchSettings, RecordInput};
use certdrop_infra::render::{RenderOptions, TemplateKind, TemplateUpload};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug)]
pub struct TemplateFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl TemplateFile {
    pub fn kind(&self) -> TemplateKind {
        if self.content_type.as_deref() == Some("application/pdf") {
            TemplateKind::Document
        } else {
            TemplateKind::from_file_name(&self.file_name)
        }
    }
}

/// Fields of `POST /api/upload`.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub csv: Option<Vec<u8>>,
    pub template: Option<TemplateFile>,
    pub sender: Option<String>,
    pub refresh_token: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub font_size: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

impl UploadForm {
    pub async fn from_multipart(
        mut multipart: Multipart,
    ) -> Result<Self, axum::response::Response> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "csvFile" => {
                    form.csv = Some(field.bytes().await.map_err(invalid_multipart)?.to_vec());
                }
                "templateFile" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(invalid_multipart)?.to_vec();
                    form.template = Some(TemplateFile {
                        file_name,
                        content_type,
                        bytes,
                    });
                }
                "senderEmail" => form.sender = Some(field.text().await.map_err(invalid_multipart)?),
                "refreshToken" => {
                    form.refresh_token = Some(field.text().await.map_err(invalid_multipart)?);
                }
                "subject" => form.subject = Some(field.text().await.map_err(invalid_multipart)?),
                "body" => form.body = Some(field.text().await.map_err(invalid_multipart)?),
                "fontSize" => form.font_size = Some(field.text().await.map_err(invalid_multipart)?),
                "xPos" => form.x = Some(field.text().await.map_err(invalid_multipart)?),
                "yPos" => form.y = Some(field.text().await.map_err(invalid_multipart)?),
                _ => {}
            }
        }
        Ok(form)
    }

    /// Validate and split into engine inputs.
    pub fn into_batch(
        self,
    ) -> Result<(RecordInput, TemplateUpload, BatchSettings), axum::response::Response> {
        let csv = self.csv.ok_or_else(|| missing("csvFile"))?;
        let template = self
            .template
            .filter(|t| !t.bytes.is_empty())
            .ok_or_else(|| missing("templateFile"))?;
        let sender = non_blank(self.sender).ok_or_else(|| missing("senderEmail"))?;
        let refresh_token = non_blank(self.refresh_token).ok_or_else(|| missing("refreshToken"))?;

        let render = RenderOptions {
            // Zero selects the engine's default size.
            font_size: lenient_number(self.font_size.as_deref()).unwrap_or(0.0),
            x: lenient_number(self.x.as_deref()),
            y: lenient_number(self.y.as_deref()),
        };
        let mut settings = BatchSettings::new(sender, refresh_token).with_render(render);
        settings.subject = non_blank(self.subject);
        settings.body_template = non_blank(self.body);

        let kind = template.kind();
        Ok((
            RecordInput::Csv(csv),
            TemplateUpload::new(template.bytes, kind),
            settings,
        ))
    }
}

/// The longest leading number of the value, so `"12px"` reads as 12.
/// Values with no leading number mean "not set".
pub fn lenient_number(value: Option<&str>) -> Option<f32> {
    let value = value?.trim();
    value
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .rev()
        .find_map(|end| value[..end].parse::<f32>().ok())
        .filter(|v| v.is_finite())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn missing(field: &str) -> axum::response::Response {
    errors::json_error(
        StatusCode::BAD_REQUEST,
        "missing_field",
        format!("{field} is required"),
    )
}

fn invalid_multipart(err: axum::extract::multipart::MultipartError) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "invalid_multipart", err.to_string())
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub message: String,
}
