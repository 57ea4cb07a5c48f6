use serde::{Deserialize, Serialize};

/// Server-side job status. Unrecognised strings deserialize to `Unknown`
/// and are polled like an in-flight job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Scoring output attached to a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub cv_match_rate: f64,     // 0.0 – 1.0
    pub cv_feedback: String,
    pub project_score: f64,     // 0.0 – 10.0
    pub project_feedback: String,
    pub overall_summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateRequest {
    pub cv_file_id: String,
    pub project_file_id: String,
    pub job_description: String,
    pub study_case_brief: String,
}

/// Body of `POST /evaluate`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmittedJob {
    pub id: String,
    pub status: JobStatus,
}

/// Body of `GET /result/{id}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<EvaluationResult>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parses_lowercase() {
        let job: JobResponse =
            serde_json::from_value(json!({"id": "j1", "status": "processing"})).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_unknown_status_is_not_terminal() {
        let job: JobResponse = serde_json::from_value(json!({"status": "scoring"})).unwrap();
        assert_eq!(job.status, JobStatus::Unknown);
        assert!(!job.status.is_terminal());
    }

    #[test]
    fn test_completed_job_carries_result() {
        let job: JobResponse = serde_json::from_value(json!({
            "id": "j1",
            "status": "completed",
            "result": {
                "cv_match_rate": 0.82,
                "cv_feedback": "Strong backend experience",
                "project_score": 7.5,
                "project_feedback": "Solid error handling",
                "overall_summary": "Good fit"
            }
        }))
        .unwrap();
        let result = job.result.unwrap();
        assert!((result.cv_match_rate - 0.82).abs() < f64::EPSILON);
        assert_eq!(result.overall_summary, "Good fit");
    }
}
