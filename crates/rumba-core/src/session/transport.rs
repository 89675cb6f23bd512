//! Request seam between the session client and the jukebox server.

use super::error::{Result, SessionError};
use super::wire::{Envelope, ResponseBody};
use async_trait::async_trait;
use reqwest::Client;
use rumba_proto::config::JukeboxConfig;
use rumba_proto::platform;
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "1.9.23";
const CLIENT_NAME: &str = "rumba-remote";

/// Query parameters; keys may repeat (`id=1&id=2`).
pub type Params = Vec<(String, String)>;

/// What a request came back with.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(ResponseBody),
    /// Raw image data (cover art).
    Bytes(Vec<u8>),
}

impl Reply {
    pub fn into_body(self) -> Result<ResponseBody> {
        match self {
            Reply::Json(body) => Ok(body),
            Reply::Bytes(_) => Err(SessionError::Unreachable(
                "expected a JSON response, got binary data".to_string(),
            )),
        }
    }
}

/// One request against the jukebox's REST dialect.
///
/// Implementations classify failures: a well-formed response that reports an
/// error is `SessionError::Logic`; anything that prevents reading a response
/// is `SessionError::Unreachable`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, endpoint: &str, params: Params) -> Result<Reply>;

    /// True when the server shares the filesystem with us.
    fn is_local(&self) -> bool {
        false
    }
}

/// Helper for building parameter lists.
pub fn params<const N: usize>(pairs: [(&str, String); N]) -> Params {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

// ── HTTP ──────────────────────────────────────────────────────────────────────

pub struct HttpTransport {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    local: bool,
}

impl HttpTransport {
    pub fn new(config: &JukeboxConfig) -> anyhow::Result<Self> {
        let mut base_url = config.url.trim().to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            anyhow::bail!("jukebox url must start with http:// or https://: {}", base_url);
        }
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(5)))
            .user_agent(format!("{}/{}", CLIENT_NAME, env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            local: platform::is_local_url(&base_url),
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn unreachable(e: reqwest::Error) -> SessionError {
        SessionError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, endpoint: &str, params: Params) -> Result<Reply> {
        let url = format!("{}{}.view", self.base_url, endpoint);
        debug!(url = %url, params = ?params, "jukebox request");

        let mut query: Params = vec![
            ("u".into(), self.username.clone()),
            ("p".into(), self.password.clone()),
            ("v".into(), API_VERSION.into()),
            ("c".into(), CLIENT_NAME.into()),
            ("f".into(), "json".into()),
        ];
        query.extend(params);

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(Self::unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Unreachable(format!(
                "{} answered HTTP {}",
                endpoint,
                status.as_u16()
            )));
        }

        let is_image = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("image/"));
        if is_image {
            let bytes = response.bytes().await.map_err(Self::unreachable)?;
            return Ok(Reply::Bytes(bytes.to_vec()));
        }

        let raw = response.bytes().await.map_err(Self::unreachable)?;
        let envelope: Envelope = serde_json::from_slice(&raw).map_err(|e| {
            SessionError::Unreachable(format!("malformed {} response: {}", endpoint, e))
        })?;
        if !envelope.body.is_ok() {
            return Err(SessionError::Logic(envelope.body.error_message()));
        }
        Ok(Reply::Json(envelope.body))
    }

    fn is_local(&self) -> bool {
        self.local
    }
}
