use thiserror::Error;

use crate::application::feed::FeedError;
use crate::application::repos::RepoError;
use crate::{domain::error::DomainError, infra::error::InfraError};

/// Failure of an outbound fetch (link previews, weather).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to `{url}` failed: {message}")]
    Request { url: String, message: String },
    #[error("`{url}` answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("`{url}` returned unsupported content: {message}")]
    Unsupported { url: String, message: String },
    #[error("could not parse response from `{url}`: {message}")]
    Parse { url: String, message: String },
}

impl FetchError {
    pub fn request(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Request {
            url: url.into(),
            message: err.to_string(),
        }
    }

    pub fn parse(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            url: url.into(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

impl From<FeedError> for AppError {
    fn from(error: FeedError) -> Self {
        match error {
            FeedError::Repo(err) => AppError::Repo(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_failures_surface_as_repository_errors() {
        let error = AppError::from(FeedError::Repo(RepoError::Timeout));
        assert!(matches!(error, AppError::Repo(RepoError::Timeout)));
    }

    #[test]
    fn fetch_errors_render_the_url() {
        let error = FetchError::Status {
            url: "https://crunevo.com/x".into(),
            status: 404,
        };
        assert_eq!(
            error.to_string(),
            "`https://crunevo.com/x` answered with status 404"
        );
    }
}
