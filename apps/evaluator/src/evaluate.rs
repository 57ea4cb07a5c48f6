//! Evaluation Submitter: creates the scoring job for an uploaded document pair.

use tracing::info;

use crate::api_client::{ApiClient, RequestOptions};
use crate::errors::{ClientError, ClientResult};
use crate::models::job::{EvaluateRequest, SubmittedJob};
use crate::models::upload::FileHandles;
use crate::session::Session;

/// Builds the request body, rejecting it when handles are missing or either
/// brief is blank. The dashboard calls this before `submit_evaluation`.
pub fn build_request(
    handles: Option<&FileHandles>,
    job_description: &str,
    study_case_brief: &str,
) -> ClientResult<EvaluateRequest> {
    let handles = handles.ok_or_else(|| {
        ClientError::Validation("Upload the CV and project report first".to_string())
    })?;
    if job_description.trim().is_empty() {
        return Err(ClientError::Validation(
            "job_description cannot be empty".to_string(),
        ));
    }
    if study_case_brief.trim().is_empty() {
        return Err(ClientError::Validation(
            "study_case_brief cannot be empty".to_string(),
        ));
    }

    Ok(EvaluateRequest {
        cv_file_id: handles.cv_file_id.clone(),
        project_file_id: handles.project_file_id.clone(),
        job_description: job_description.to_string(),
        study_case_brief: study_case_brief.to_string(),
    })
}

/// POST /evaluate
pub async fn submit_evaluation(
    api: &ApiClient,
    session: &Session,
    request: &EvaluateRequest,
) -> ClientResult<SubmittedJob> {
    let options = RequestOptions::post()
        .json(request)?
        .with_session(session)?;
    let job: SubmittedJob = api.request_as("/evaluate", options).await?;

    info!(job_id = %job.id, status = ?job.status, "evaluation submitted");
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles() -> FileHandles {
        FileHandles {
            cv_file_id: "cv-1".to_string(),
            project_file_id: "pr-1".to_string(),
        }
    }

    #[test]
    fn test_requires_handles() {
        let err = build_request(None, "Backend engineer", "Build a queue").unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[test]
    fn test_requires_non_blank_texts() {
        assert!(matches!(
            build_request(Some(&handles()), "  ", "Build a queue"),
            Err(ClientError::Validation(_))
        ));
        assert!(matches!(
            build_request(Some(&handles()), "Backend engineer", ""),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn test_builds_body_from_handles() {
        let request = build_request(Some(&handles()), "Backend engineer", "Build a queue").unwrap();
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "cv_file_id": "cv-1",
                "project_file_id": "pr-1",
                "job_description": "Backend engineer",
                "study_case_brief": "Build a queue"
            })
        );
    }
}
