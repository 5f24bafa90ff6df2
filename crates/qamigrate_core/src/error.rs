use serde_json::Value;
use thiserror::Error;

/// Failure classes surfaced by the migration tooling.
///
/// Everything except `ItemProcessing` is fatal to a run. Library code raises
/// these through `anyhow`; callers recover the variant with
/// `error.downcast_ref::<MigrateError>()`.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("credentials not initialized; call initialize() first")]
    NotInitialized,
    #[error("authentication failed after token refresh: {0}")]
    Auth(String),
    #[error("API request failed after {attempts} attempts: {errors}")]
    Api { attempts: u32, errors: Value },
    #[error("failed to process question {question_id}: {message}")]
    ItemProcessing { question_id: i64, message: String },
}

impl MigrateError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ItemProcessing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::MigrateError;

    #[test]
    fn only_item_failures_are_recoverable() {
        assert!(MigrateError::configuration("missing GHD_APP_ID").is_fatal());
        assert!(MigrateError::NotInitialized.is_fatal());
        assert!(
            !MigrateError::ItemProcessing {
                question_id: 7,
                message: "boom".to_string(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn typed_errors_survive_anyhow_round_trip() {
        let error = anyhow::Error::new(MigrateError::Auth("Bad credentials".to_string()))
            .context("request failed");
        assert!(matches!(
            error.downcast_ref::<MigrateError>(),
            Some(MigrateError::Auth(_))
        ));
    }
}
