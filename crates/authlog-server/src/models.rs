//! API request and response models.

use serde::{Deserialize, Serialize};

/// Default number of entries returned by `GET /api/logs`.
pub const DEFAULT_LOGS_LIMIT: usize = 100;

/// Query parameters for listing logs.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// Maximum number of logs to return, as sent by the client.
    pub limit: Option<String>,
}

impl LogsQuery {
    /// The requested limit. Missing, zero or unparseable values fall back
    /// to [`DEFAULT_LOGS_LIMIT`].
    pub fn limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_LOGS_LIMIT)
    }
}

/// Reply to `POST /api/logs`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Reply to `GET /api/health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Connected live-stream sessions.
    pub subscribers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(limit: Option<&str>) -> LogsQuery {
        LogsQuery {
            limit: limit.map(String::from),
        }
    }

    #[test]
    fn limit_parses_numbers() {
        assert_eq!(query(Some("2")).limit(), 2);
        assert_eq!(query(Some(" 250 ")).limit(), 250);
    }

    #[test]
    fn limit_falls_back_to_default() {
        assert_eq!(query(None).limit(), DEFAULT_LOGS_LIMIT);
        assert_eq!(query(Some("abc")).limit(), DEFAULT_LOGS_LIMIT);
        assert_eq!(query(Some("0")).limit(), DEFAULT_LOGS_LIMIT);
        assert_eq!(query(Some("-5")).limit(), DEFAULT_LOGS_LIMIT);
        assert_eq!(query(Some("")).limit(), DEFAULT_LOGS_LIMIT);
    }
}
