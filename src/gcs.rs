//! Google Cloud Storage client over the JSON API.

use crate::auth::{CredentialSource, TokenProvider};
use crate::error::SyncError;
use crate::storage::StorageClient;
use crate::types::ObjectEntry;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::io;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Public GCS endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

const PAGE_SIZE: &str = "1000";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ListItem {
    name: String,
    /// The JSON API encodes sizes as decimal strings.
    #[serde(default)]
    size: Option<String>,
}

/// A [`StorageClient`] backed by the GCS JSON API.
///
/// Holds one pooled HTTP client; cloning the surrounding `Arc` is how it is
/// shared between workers.
#[derive(Debug)]
pub struct GcsClient {
    http: reqwest::Client,
    endpoint: String,
    tokens: TokenProvider,
}

impl GcsClient {
    /// Builds a client for `endpoint`, resolving credentials once up front.
    pub async fn connect(
        endpoint: impl Into<String>,
        credentials: &CredentialSource,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("bucketsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let tokens = TokenProvider::from_source(http.clone(), credentials).await?;
        Ok(Self::with_tokens(http, endpoint, tokens))
    }

    /// Builds a client around an existing HTTP client and token provider.
    pub fn with_tokens(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        tokens: TokenProvider,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn objects_url(&self, bucket: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o",
            self.endpoint,
            urlencoding::encode(bucket)
        )
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}", self.objects_url(bucket), urlencoding::encode(key))
    }

    async fn authorized(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, SyncError> {
        Ok(match self.tokens.bearer().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SyncError> {
        let response = self.authorized(request).await?.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Http {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl StorageClient for GcsClient {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectEntry>, SyncError> {
        let url = self.objects_url(bucket);
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: ListPage = {
                let mut query = vec![
                    ("fields", "items(name,size),nextPageToken"),
                    ("maxResults", PAGE_SIZE),
                ];
                if let Some(p) = prefix {
                    query.push(("prefix", p));
                }
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                self.send(self.http.get(&url).query(&query))
                    .await?
                    .json()
                    .await?
            };

            objects.extend(page.items.into_iter().filter_map(|item| {
                // Skip directory placeholders
                if item.name.ends_with('/') {
                    return None;
                }
                let size = item.size.and_then(|s| s.parse().ok()).unwrap_or(0);
                Some(ObjectEntry::new(item.name, size))
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(
            "Listed {} objects in gs://{}/{}",
            objects.len(),
            bucket,
            prefix.unwrap_or("")
        );
        Ok(objects)
    }

    async fn fetch_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let url = self.object_url(bucket, key);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            response = self.send(self.http.get(&url).query(&[("alt", "media")])) => response?,
        };
        let content_length = response.content_length();

        let mut file = BufWriter::new(tokio::fs::File::create(destination).await?);
        let mut byte_stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let piece = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                piece = byte_stream.next() => piece,
            };
            let Some(piece) = piece else { break };
            let chunk = piece?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        check_length(key, content_length, written)?;
        Ok(written)
    }
}

fn check_length(key: &str, content_length: Option<u64>, written: u64) -> Result<(), SyncError> {
    match content_length {
        Some(expected) if expected != written => Err(SyncError::IoError(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Size mismatch for {}: expected {} bytes, got {} bytes",
                key, expected, written
            ),
        ))),
        Some(_) => Ok(()),
        None => {
            warn!(
                "Content-Length header was not present for {}. Cannot verify file size.",
                key
            );
            Ok(())
        }
    }
}
