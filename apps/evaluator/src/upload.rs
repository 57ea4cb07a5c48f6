//! Upload Coordinator: sends the CV and project report as one multipart
//! request and returns the two file handles.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use tracing::info;

use crate::api_client::{ApiClient, RequestOptions};
use crate::errors::{ClientError, ClientResult};
use crate::models::upload::{FileHandles, UploadResponse};
use crate::session::Session;

/// A document selected for upload.
#[derive(Debug, Clone)]
pub struct DocumentFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DocumentFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_type_for(&file_name).to_string();
        Self {
            file_name,
            mime_type,
            bytes,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ClientError::Validation(format!("cannot read {}: {e}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        Ok(Self::new(file_name, bytes))
    }

    fn into_part(self) -> ClientResult<Part> {
        Part::bytes(self.bytes)
            .file_name(self.file_name)
            .mime_str(&self.mime_type)
            .map_err(ClientError::Http)
    }
}

fn mime_type_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// POST /upload
///
/// Both documents are required; a missing one fails locally without a call.
/// Failures are returned as-is, there is no retry.
pub async fn upload_documents(
    api: &ApiClient,
    session: &Session,
    cv: Option<DocumentFile>,
    project_report: Option<DocumentFile>,
) -> ClientResult<FileHandles> {
    let (cv, project_report) = match (cv, project_report) {
        (Some(cv), Some(report)) => (cv, report),
        _ => {
            return Err(ClientError::Validation(
                "Both the CV and the project report are required".to_string(),
            ))
        }
    };

    info!(
        cv = %cv.file_name,
        project_report = %project_report.file_name,
        "uploading documents"
    );

    let form = Form::new()
        .part("cv", cv.into_part()?)
        .part("project_report", project_report.into_part()?);

    let options = RequestOptions::post().multipart(form).with_session(session)?;
    let response: UploadResponse = api.request_as("/upload", options).await?;

    let handles = response.into_handles().ok_or_else(|| ClientError::Request {
        status: 200,
        message: "Upload response did not include both file ids".to_string(),
    })?;

    info!(
        cv_file_id = %handles.cv_file_id,
        project_file_id = %handles.project_file_id,
        "documents uploaded"
    );
    Ok(handles)
}
