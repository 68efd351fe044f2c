/// Credentials document shape: a small untagged structure mirroring each
/// adapter's own field names, so the runner can auto-detect which adapter
/// to build without a discriminator tag in the file itself.
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub user_id: Option<String>,
    pub client_code: Option<String>,
    pub password: Option<String>,
    pub totp_secret: Option<String>,
    pub totp_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedBroker {
    Zerodha,
    AngelOne,
}

/// `api_secret` present -> Zerodha; `totp_token` present without
/// `api_secret` -> AngelOne.
pub fn detect_broker(credentials: &Credentials) -> Option<DetectedBroker> {
    if credentials.api_secret.is_some() {
        Some(DetectedBroker::Zerodha)
    } else if credentials.totp_token.is_some() {
        Some(DetectedBroker::AngelOne)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_secret_selects_zerodha() {
        let creds = Credentials {
            api_key: Some("k".into()),
            api_secret: Some("s".into()),
            user_id: None,
            client_code: None,
            password: None,
            totp_secret: None,
            totp_token: None,
        };
        assert_eq!(detect_broker(&creds), Some(DetectedBroker::Zerodha));
    }

    #[test]
    fn totp_token_without_api_secret_selects_angelone() {
        let creds = Credentials {
            api_key: None,
            api_secret: None,
            user_id: None,
            client_code: Some("c".into()),
            password: None,
            totp_secret: None,
            totp_token: Some("t".into()),
        };
        assert_eq!(detect_broker(&creds), Some(DetectedBroker::AngelOne));
    }

    #[test]
    fn neither_field_is_undetected() {
        let creds = Credentials {
            api_key: None,
            api_secret: None,
            user_id: None,
            client_code: None,
            password: None,
            totp_secret: None,
            totp_token: None,
        };
        assert_eq!(detect_broker(&creds), None);
    }
}
