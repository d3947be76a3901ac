use thiserror::Error;

#[derive(Debug, Error)]
pub enum RobertError {
    #[error("No server key found for {date}")]
    NoServerKeyFound { date: chrono::NaiveDate },

    #[error("Malformed EBID: expected 8 bytes, got {len}")]
    MalformedEbid { len: usize },

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Epoch mismatch: request epoch {auth_epoch}, EBID epoch {ebid_epoch}")]
    EpochMismatch { auth_epoch: i32, ebid_epoch: i32 },

    #[error("Unknown identity")]
    UnknownIdentity,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Tuple generation produced no tuples")]
    EmptyBundle,

    #[error("Crypto error: {0}")]
    Crypto(#[from] robert_crypto::CryptoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RobertError {
    /// Numeric result code handed to collaborators; the web layer maps it 1:1.
    pub fn code(&self) -> u16 {
        match self {
            RobertError::NoServerKeyFound { .. } => 430,
            RobertError::MalformedInput(_)
            | RobertError::EpochMismatch { .. }
            | RobertError::AuthenticationFailed => 400,
            RobertError::UnknownIdentity => 404,
            RobertError::MalformedEbid { .. }
            | RobertError::EmptyBundle
            | RobertError::Crypto(_)
            | RobertError::Json(_)
            | RobertError::Config(_)
            | RobertError::Internal(_) => 500,
        }
    }

    /// Whether the failure is attributable to the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        self.code() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        let date = chrono::NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        assert_eq!(RobertError::NoServerKeyFound { date }.code(), 430);
        assert_eq!(RobertError::MalformedEbid { len: 7 }.code(), 500);
        assert_eq!(RobertError::MalformedInput("x".into()).code(), 400);
        assert_eq!(
            RobertError::EpochMismatch { auth_epoch: 1, ebid_epoch: 3 }.code(),
            400
        );
        assert_eq!(RobertError::UnknownIdentity.code(), 404);
        assert_eq!(RobertError::AuthenticationFailed.code(), 400);
        assert_eq!(RobertError::EmptyBundle.code(), 500);
        assert_eq!(
            RobertError::from(robert_crypto::CryptoError::DataTooShort).code(),
            500
        );
    }

    #[test]
    fn client_errors_are_below_500() {
        assert!(RobertError::UnknownIdentity.is_client_error());
        assert!(!RobertError::Internal("boom".into()).is_client_error());
    }

    #[test]
    fn messages_do_not_contain_key_material() {
        let date = chrono::NaiveDate::from_ymd_opt(2022, 3, 4).unwrap();
        assert_eq!(
            RobertError::NoServerKeyFound { date }.to_string(),
            "No server key found for 2022-03-04"
        );
    }
}
