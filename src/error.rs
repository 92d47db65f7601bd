use std::path::PathBuf;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Authentication error (error: {0})")]
    Auth(#[from] yup_oauth2::Error),
    #[error("Failed to read credentials from {path}: {source}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Request to google api error (error: {0})")]
    Request(#[from] reqwest::Error),
    #[error("Google api returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Malformed google api response: {0}")]
    MalformedResponse(String),
    #[error(
        "waited {attempts} tries for all the source files to be present. expected {expected}, found {observed} at {location}"
    )]
    ReadinessTimeout {
        expected: usize,
        observed: usize,
        attempts: u32,
        location: String,
    },
    #[error("Load job submission rejected: {message}")]
    Submission { message: String },
    #[error("Job {job_id} failed: {payload}")]
    Job { job_id: String, payload: String },
    #[error("Invalid storage location '{0}': expected gs://<bucket>/<path>")]
    InvalidLocation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),
    #[error("Cancelled while {phase}")]
    Cancelled { phase: &'static str },
    #[error("Gave up {phase} after {waited:?}")]
    DeadlineExceeded { phase: &'static str, waited: Duration },
}

impl LoadError {
    /// Whether the transport should retry the call that produced this error.
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::Request(err) => err.is_timeout() || err.is_connect(),
            LoadError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = LoadError::Api {
            status: 503,
            message: "backend unavailable".into(),
        };
        assert!(err.is_transient());
        let err = LoadError::Api {
            status: 429,
            message: "rate limited".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn client_and_job_errors_are_not_transient() {
        let err = LoadError::Api {
            status: 404,
            message: "Not found: Dataset p:d".into(),
        };
        assert!(!err.is_transient());
        let err = LoadError::Job {
            job_id: "abc".into(),
            payload: "boom".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn readiness_timeout_reports_counts() {
        let err = LoadError::ReadinessTimeout {
            expected: 3,
            observed: 2,
            attempts: 40,
            location: "gs://bucket/etl/".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("found 2"));
        assert!(msg.contains("gs://bucket/etl/"));
    }
}
