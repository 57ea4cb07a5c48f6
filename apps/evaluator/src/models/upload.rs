use serde::{Deserialize, Serialize};

/// Opaque identifiers for the two stored documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandles {
    pub cv_file_id: String,
    pub project_file_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResponse {
    pub cv_file_id: Option<String>,
    pub project_file_id: Option<String>,
}

impl UploadResponse {
    pub fn into_handles(self) -> Option<FileHandles> {
        match (self.cv_file_id, self.project_file_id) {
            (Some(cv), Some(project)) if !cv.is_empty() && !project.is_empty() => {
                Some(FileHandles {
                    cv_file_id: cv,
                    project_file_id: project,
                })
            }
            _ => None,
        }
    }
}
