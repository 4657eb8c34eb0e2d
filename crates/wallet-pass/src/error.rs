use thiserror::Error;

/// Fatal failures of a pass generation request.
///
/// None of these are retried: identical input fails identically. The
/// non-fatal categories (image fetches, Google REST calls) have their own
/// error types in [`crate::assets`] and [`crate::google::rest`] and are only
/// ever logged.
#[derive(Debug, Error)]
pub enum PassError {
    /// Required configuration or secret missing or malformed.
    #[error("configuration error in `{field}`: {reason}")]
    Config { field: String, reason: String },

    /// A certificate could not be parsed by either parsing strategy.
    #[error("{name}: failed to parse certificate. primary error: {primary}. fallback error: {fallback}")]
    CertParse {
        name: String,
        primary: String,
        fallback: String,
    },

    /// A certificate parsed but does not satisfy Apple's chain requirements.
    #[error("{name}: {reason}")]
    CertValidation { name: String, reason: String },

    /// Resolved pass content violates a cardinality or emptiness rule.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("packaging error: {0}")]
    Packaging(String),
}

impl PassError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn cert_validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CertValidation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Always `false`: every fatal category is deterministic.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Whether the failure points at the tenant's pass configuration rather
    /// than at process secrets or infrastructure.
    pub fn is_tenant_error(&self) -> bool {
        match self {
            PassError::Validation(_) => true,
            PassError::Config { field, .. } => !is_secret_field(field),
            _ => false,
        }
    }
}

pub(crate) const SECRET_FIELDS: &[&str] = &[
    "signer certificate",
    "signer private key",
    "WWDR certificate",
    "service account",
];

fn is_secret_field(field: &str) -> bool {
    SECRET_FIELDS.iter().any(|secret| field.starts_with(secret))
}

pub type Result<T, E = PassError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_errors_are_distinguished_from_secret_errors() {
        assert!(PassError::Validation("missing primary field".into()).is_tenant_error());
        assert!(PassError::config("passTypeId", "is required").is_tenant_error());
        assert!(!PassError::config("signer private key", "empty").is_tenant_error());
        assert!(!PassError::Signing("boom".into()).is_tenant_error());
    }

    #[test]
    fn messages_name_the_failing_member() {
        let err = PassError::CertParse {
            name: "WWDR certificate".into(),
            primary: "bad pem".into(),
            fallback: "bad der".into(),
        };
        let text = err.to_string();
        assert!(text.contains("WWDR certificate"));
        assert!(text.contains("bad pem"));
        assert!(text.contains("bad der"));
        assert!(!err.is_retryable());
    }
}
