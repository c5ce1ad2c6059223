//! Key-pair header authentication for the Alpaca API.

use reqwest::header::{HeaderMap, HeaderValue};

use common::Error;

const KEY_HEADER: &str = "apca-api-key-id";
const SECRET_HEADER: &str = "apca-api-secret-key";

/// Holds API credentials.
#[derive(Clone)]
pub struct AlpacaAuth {
    pub api_key: String,
    api_secret: String,
}

impl std::fmt::Debug for AlpacaAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaAuth")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl AlpacaAuth {
    pub fn new(api_key: &str, api_secret: &str) -> Result<Self, Error> {
        let api_key = api_key.trim();
        let api_secret = api_secret.trim();
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(Error::Config("Alpaca key id and secret are both required".into()));
        }
        Ok(Self {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    /// Build the auth headers attached to every request.
    pub fn headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| Error::Config(format!("API key is not a valid header value: {e}")))?;
        let mut secret = HeaderValue::from_str(&self.api_secret)
            .map_err(|e| Error::Config(format!("API secret is not a valid header value: {e}")))?;
        secret.set_sensitive(true);
        headers.insert(KEY_HEADER, key);
        headers.insert(SECRET_HEADER, secret);
        Ok(headers)
    }
}
