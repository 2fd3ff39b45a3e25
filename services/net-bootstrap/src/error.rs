//! Error types for the network bootstrap.

use hostnet_netconf::NetconfError;
use thiserror::Error;

/// Bootstrap errors with standardized reason codes.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The local IPv4 address could not be determined.
    #[error("resolution_failed: {0}")]
    Resolution(String),

    /// The configuration service could not be reached.
    #[error("service_unavailable: {0}")]
    ServiceUnavailable(String),

    /// The configuration service refused the request.
    #[error("configuration_rejected: code={code}: {message}")]
    ConfigurationRejected { code: i64, message: String },

    /// The record failed local validation.
    #[error("invalid_config: {0}")]
    InvalidConfig(#[from] NetconfError),

    /// The service answered with something that is not a valid reply.
    #[error("protocol_error: {0}")]
    Protocol(String),

    /// Certificates or keys for the TLS transport could not be loaded.
    #[error("tls_setup_failed: {0}")]
    Tls(String),
}

impl BootstrapError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            BootstrapError::Resolution(_) => "resolution_failed",
            BootstrapError::ServiceUnavailable(_) => "service_unavailable",
            BootstrapError::ConfigurationRejected { .. } => "configuration_rejected",
            BootstrapError::InvalidConfig(_) => "invalid_config",
            BootstrapError::Protocol(_) => "protocol_error",
            BootstrapError::Tls(_) => "tls_setup_failed",
        }
    }

    pub(crate) fn unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        BootstrapError::ServiceUnavailable(format!("{}: {}", context, err))
    }
}

impl From<std::io::Error> for BootstrapError {
    fn from(err: std::io::Error) -> Self {
        BootstrapError::ServiceUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for BootstrapError {
    fn from(err: reqwest::Error) -> Self {
        BootstrapError::ServiceUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_match_display_prefix() {
        let errors = [
            BootstrapError::Resolution("no address".into()),
            BootstrapError::ServiceUnavailable("refused".into()),
            BootstrapError::ConfigurationRejected {
                code: 25,
                message: "bad nic".into(),
            },
            BootstrapError::InvalidConfig(NetconfError::InvalidNic(String::new())),
            BootstrapError::Protocol("truncated".into()),
            BootstrapError::Tls("no CA certificate".into()),
        ];

        for err in errors {
            assert!(err.to_string().starts_with(err.reason_code()));
        }
    }
}
