use thiserror::Error;

/// Substrings that identify an expired or missing SSO session in backend errors
const AUTH_EXPIRY_SIGNALS: &[&str] = &[
    "sso session",
    "token has expired",
    "expired token",
    "unauthorized",
    "invalid_grant",
];

#[derive(Error, Debug)]
pub enum IdcError {
    /// Any failed backend call (network, throttling, validation, ...)
    #[error("{0}")]
    Api(String),

    #[error("{0}")]
    AuthExpired(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("{operation} failed: {reason}")]
    AsyncOperationFailed { operation: String, reason: String },

    #[error("operation canceled")]
    Canceled,

    #[error("ListInstances returned zero Identity Center instances")]
    NoInstances,

    #[error("aws sso login failed: {0}")]
    Login(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Update failed: {0}")]
    Update(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Interactive prompt error: {0}")]
    Dialoguer(#[from] dialoguer::Error),
}

pub type Result<T> = std::result::Result<T, IdcError>;

impl IdcError {
    /// Classify a raw backend failure message
    pub fn from_backend_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_auth_expiry_message(&message) {
            IdcError::AuthExpired(message)
        } else if message.to_lowercase().contains("accessdenied") {
            IdcError::AccessDenied(message)
        } else {
            IdcError::Api(message)
        }
    }

    /// Whether this error should trigger the interactive login path
    pub fn is_auth_expired(&self) -> bool {
        match self {
            IdcError::AuthExpired(_) => true,
            IdcError::Api(msg) => is_auth_expiry_message(msg),
            _ => false,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, IdcError::Canceled)
    }

    /// Suggested next step for the operator, if there is an obvious one
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            IdcError::AuthExpired(_) | IdcError::Login(_) => {
                Some("Run `aws sso login --profile <profile>` and retry")
            }
            IdcError::AccessDenied(_) => {
                Some("Check that the profile's permission set allows this action")
            }
            IdcError::NoInstances => {
                Some("Verify account/region and IAM Identity Center setup")
            }
            IdcError::Api(msg) if msg.contains("ThrottlingException") => {
                Some("API rate limit exceeded. Wait a moment and refresh")
            }
            IdcError::Api(msg) if msg.contains("ConflictException") => {
                Some("Another change is in progress for this resource. Refresh and retry")
            }
            _ => None,
        }
    }
}

pub fn is_auth_expiry_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    AUTH_EXPIRY_SIGNALS.iter().any(|signal| lower.contains(signal))
}
