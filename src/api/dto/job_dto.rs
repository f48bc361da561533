//! Job trigger responses.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result of a triggered background job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobResponse {
    /// What the job did, e.g. `synced` or `not_modified`.
    pub status: String,
    /// Number of items the job touched, when meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl JobResponse {
    /// A response with a status and a count.
    #[must_use]
    pub fn counted(status: &str, count: usize) -> Self {
        Self {
            status: status.to_string(),
            count: Some(count),
        }
    }

    /// A response with only a status.
    #[must_use]
    pub fn status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            count: None,
        }
    }
}
