use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Wiki \"{0}\" not found in config")]
    UnknownWiki(String),
    #[error("Default wiki \"{0}\" not found in config")]
    DefaultWikiMissing(String),
    #[error("Wiki \"{key}\" has an empty {field}")]
    InvalidProfile { key: String, field: &'static str },
}

/// Failures of a single gateway call.
///
/// `Request` and `HttpStatus` are transport level; `Api` and `Auth` are
/// reported by the remote wiki itself.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to get MediaWiki csrf token: {0}")]
    TokenAcquisition(String),
    #[error("failed to call MediaWiki API: {0}")]
    Request(#[from] reqwest::Error),
    #[error("MediaWiki API request failed with HTTP {0}")]
    HttpStatus(StatusCode),
    #[error("MediaWiki API error [{code}]: {info}")]
    Api { code: String, info: String },
    #[error("MediaWiki API rejected credentials [{code}]: {info}")]
    Auth { code: String, info: String },
    #[error("failed to decode MediaWiki API response: {0}")]
    Decode(String),
    #[error("invalid MediaWiki API URL: {0}")]
    InvalidUrl(String),
}

impl GatewayError {
    /// Classify an `error` object returned by the API.
    pub fn from_api(code: &str, info: &str) -> Self {
        if is_auth_error_code(code) {
            Self::Auth {
                code: code.to_string(),
                info: info.to_string(),
            }
        } else {
            Self::Api {
                code: code.to_string(),
                info: info.to_string(),
            }
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

fn is_auth_error_code(code: &str) -> bool {
    matches!(
        code,
        "notloggedin"
            | "permissiondenied"
            | "readapidenied"
            | "writeapidenied"
            | "badaccess-groups"
            | "assertuserfailed"
            | "assertnameduserfailed"
    ) || code.starts_with("mwoauth-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_codes_are_classified() {
        assert!(GatewayError::from_api("readapidenied", "private wiki").is_auth());
        assert!(GatewayError::from_api("mwoauth-invalid-authorization", "bad token").is_auth());
        assert!(!GatewayError::from_api("editconflict", "conflict").is_auth());
        assert!(!GatewayError::HttpStatus(StatusCode::BAD_GATEWAY).is_auth());
    }

    #[test]
    fn api_error_message_matches_wire_fields() {
        let error = GatewayError::from_api("editconflict", "Edit conflict.");
        assert_eq!(
            error.to_string(),
            "MediaWiki API error [editconflict]: Edit conflict."
        );
    }
}
