//! Cell-scoped REST access.
//!
//! [`RestScope`] pins a base URL (normally `<instance>/api/v2/cells/<cell>`)
//! and the access token, so callers only name the resource path.  Non-2xx
//! answers become typed [`ArmError`]s:
//!
//! | Status           | Error                         |
//! |------------------|-------------------------------|
//! | 404              | [`ArmError::NotFound`]        |
//! | 405, 501         | [`ArmError::Unsupported`]     |
//! | any other non-2xx| [`ArmError::Http`]            |
//!
//! Connection failures map to [`ArmError::Transport`] and undecodable bodies
//! to [`ArmError::Parse`].

use armlink_types::ArmError;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

#[derive(Clone)]
pub struct RestScope {
    base: Url,
    token: Option<String>,
    http: reqwest::Client,
}

impl std::fmt::Debug for RestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestScope")
            .field("base", &self.base.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RestScope {
    pub fn new(base: Url, token: Option<String>) -> Self {
        Self {
            base,
            token,
            http: reqwest::Client::new(),
        }
    }

    /// Share an existing connection pool.
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// A scope rooted at `path` below this one, sharing token and pool.
    pub fn scoped(&self, path: &str) -> Result<RestScope, ArmError> {
        Ok(Self {
            base: self.url(path)?,
            token: self.token.clone(),
            http: self.http.clone(),
        })
    }

    /// Resolve `path` (slash-separated, leading slash optional) below the base.
    pub fn url(&self, path: &str) -> Result<Url, ArmError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ArmError::Config(format!("'{}' cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ArmError> {
        let response = self.execute(Method::GET, path, |req| req).await?;
        decode(path, response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ArmError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.execute(Method::POST, path, |req| req.json(body)).await?;
        decode(path, response).await
    }

    /// POST and discard the response body.
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ArmError> {
        self.execute(Method::POST, path, |req| req.json(body)).await?;
        Ok(())
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response, ArmError> {
        let url = self.url(path)?;
        debug!(%method, url = %url, "rest request");

        let mut request = build(self.http.request(method, url.clone()));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ArmError::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(status_error(status, path, message))
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ArmError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ArmError::Transport(format!("{path}: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ArmError::Parse(format!("{path}: {e}")))
}

fn status_error(status: StatusCode, path: &str, message: String) -> ArmError {
    match status {
        StatusCode::NOT_FOUND => ArmError::NotFound {
            kind: "resource".to_string(),
            id: path.trim_matches('/').to_string(),
        },
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
            ArmError::Unsupported(format!("{path}: {message}"))
        }
        other => ArmError::Http {
            status: other.as_u16(),
            message,
        },
    }
}
