//! `reqwest`-backed [`HttpClient`] with bearer auth.

use std::sync::Arc;

use super::{CredentialProvider, FetchError, HttpClient};

/// [`HttpClient`] over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl ReqwestClient {
    /// Uses a default `reqwest::Client`.
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_client(reqwest::Client::new(), credentials)
    }

    /// Wraps a preconfigured client.
    pub fn with_client(inner: reqwest::Client, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { inner, credentials }
    }

    async fn send(&self, url: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response, FetchError> {
        let resp = req
            .bearer_auth(self.credentials.access_token())
            .send()
            .await
            .map_err(|err| transport(url, err))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }
}

impl HttpClient for ReqwestClient {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self.send(url, self.inner.get(url)).await?;
        let bytes = resp.bytes().await.map_err(|err| transport(url, err))?;
        Ok(bytes.to_vec())
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let resp = self.send(url, self.inner.get(url)).await?;
        let bytes = resp.bytes().await.map_err(|err| transport(url, err))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value, FetchError> {
        let resp = self.send(url, self.inner.post(url).json(body)).await?;
        let bytes = resp.bytes().await.map_err(|err| transport(url, err))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn transport(url: &str, err: reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        message: err.to_string(),
    }
}
