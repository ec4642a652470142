//! Collaborators for authenticated HTTP and bulk page transfer.
//!
//! The crate never opens HTTP connections on its own: callers supply an
//! [`HttpClient`]. With the `http` feature enabled,
//! [`reqwest_client::ReqwestClient`] is available as a ready-made one.

#[cfg(feature = "http")]
pub mod reqwest_client;

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::core::{bootstrap::PageRequest, bucket::BucketSpec};

/// HTTP collaborator failures.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-success status.
    #[error("GET {url} returned status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// Connection-level failure reported by the client.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Client error text.
        message: String,
    },
    /// Response body was not the expected JSON.
    #[error("bad json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Supplies the access token used for login and HTTP auth.
pub trait CredentialProvider: Send + Sync {
    /// Current token; called once per login or request.
    fn access_token(&self) -> String;
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl CredentialProvider for StaticToken {
    fn access_token(&self) -> String {
        self.0.clone()
    }
}

/// Authenticated HTTP calls the crate needs.
pub trait HttpClient: Send + Sync + 'static {
    /// GET returning the raw body.
    fn get_bytes(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;

    /// GET returning a JSON body.
    fn get_json(&self, url: &str) -> impl Future<Output = Result<serde_json::Value, FetchError>> + Send;

    /// POST a JSON body, returning the JSON answer.
    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, FetchError>> + Send;
}

/// Produces raw page bytes for a bucket. The runtime decodes them.
pub trait PageSource: Send + Sync + 'static {
    /// Bytes of one page in `bucket.format`.
    fn fetch_page(
        &self,
        scope: &str,
        bucket: &BucketSpec,
        request: PageRequest,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Page source backed by the content server's bucket endpoints.
#[derive(Debug, Clone)]
pub struct HttpPageSource<H> {
    client: H,
    base_url: String,
}

impl<H: HttpClient> HttpPageSource<H> {
    /// `base_url` is the server root, e.g. `https://content.example.net`.
    pub fn new(client: H, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// The wrapped client.
    pub fn client(&self) -> &H {
        &self.client
    }

    /// `{base}/{scope}`.
    pub fn scope_url(&self, scope: &str) -> String {
        format!("{}/{}", self.base_url, scope)
    }

    /// `{base}/{scope}/buckets/{bucket}?format=..&skip=..&limit=..`
    pub fn page_url(&self, scope: &str, bucket: &BucketSpec, request: PageRequest) -> String {
        format!(
            "{}/buckets/{}?format={}&skip={}&limit={}",
            self.scope_url(scope),
            bucket.name,
            bucket.format.tag(),
            request.skip(),
            request.limit
        )
    }

    /// Fetches `{base}/{scope}/bucket_list`.
    pub async fn bucket_list(&self, scope: &str) -> Result<BucketList, FetchError> {
        let url = format!("{}/bucket_list", self.scope_url(scope));
        let json = self.client.get_json(&url).await?;
        Ok(serde_json::from_value(json)?)
    }

    /// Sum of `allowed_count` across the scope's buckets, for progress bars.
    pub async fn total_content_count(&self, scope: &str) -> Result<u64, FetchError> {
        Ok(self.bucket_list(scope).await?.total_allowed())
    }
}

impl<H: HttpClient> PageSource for HttpPageSource<H> {
    async fn fetch_page(&self, scope: &str, bucket: &BucketSpec, request: PageRequest) -> Result<Vec<u8>, FetchError> {
        let url = self.page_url(scope, bucket, request);
        debug!(%url, "fetching page");
        self.client.get_bytes(&url).await
    }
}

/// Response of `{scope}/bucket_list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BucketList {
    /// One entry per bucket the caller may read.
    #[serde(default)]
    pub buckets: Vec<BucketListEntry>,
}

/// One bucket in a [`BucketList`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BucketListEntry {
    /// Bucket name, when the server sends one.
    #[serde(default)]
    pub name: Option<String>,
    /// Records the caller is allowed to see.
    #[serde(default)]
    pub allowed_count: u64,
}

impl BucketList {
    /// Sum of every entry's `allowed_count`.
    pub fn total_allowed(&self) -> u64 {
        self.buckets.iter().map(|b| b.allowed_count).sum()
    }
}
