// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::Method;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

mod auth;
pub mod buckets;
pub mod multipart;
pub mod objects;
mod retry;
mod xml;

pub use buckets::{BucketSummary, CreateBucketOutput, DeleteBucketOutput, ListBucketsOutput};
pub use multipart::{
    AbortMultipartOutput, CompleteMultipartOutput, CreateMultipartOutput, Part, UploadPartOutput,
};
pub use objects::{GetObjectOutput, ListObjectsOutput, ObjectSummary, PutObjectOutput};

use auth::Signer;
use retry::RetryPolicy;

/// Ceiling for a single HTTP request, large parts included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Idle connections kept per host.
const POOL: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{context}: status code {status}, request id '{request_id}': {message}")]
    Status {
        context: String,
        status: u16,
        message: String,
        request_id: String,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Identifiers returned by S3 compatible services for log correlation.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub reference: String,
    pub request: String,
}

impl Metadata {
    fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            reference: text("x-amz-id-2"),
            request: text("x-amz-request-id"),
        }
    }
}

/// Authentication details.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub account: String,
    pub secret: String,
}

/// An S3 compatible storage provider.
#[derive(Debug, Clone)]
pub struct Provider {
    pub endpoint: String,
    pub region: String,
}

impl Provider {
    pub(crate) fn url(&self) -> String {
        format!("https://{}", self.endpoint)
    }

    pub(crate) fn bucket_url(&self, bucket: &str) -> String {
        format!("https://{}.{}", bucket, self.endpoint)
    }
}

/// The operations the replication pipeline needs from an object store.
///
/// `Store` talks to a real endpoint; tests substitute in-memory fakes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_all_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutObjectOutput, StoreError>;

    /// `range` is an inclusive byte window; `None` fetches the whole object.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> Result<GetObjectOutput, StoreError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<CreateMultipartOutput, StoreError>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<UploadPartOutput, StoreError>;

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<Part>,
    ) -> Result<CompleteMultipartOutput, StoreError>;

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<AbortMultipartOutput, StoreError>;
}

/// Exposes common S3 operations by way of the S3 REST API.
pub struct Store {
    http: reqwest::Client,
    provider: Provider,
    signer: Signer,
    token: CancellationToken,
}

/// One prepared operation; rebuilt and re-signed per attempt.
pub(crate) struct Call {
    method: Method,
    url: String,
    headers: Vec<(&'static str, String)>,
    body: Option<Bytes>,
    ok: &'static [u16],
    context: String,
}

impl Call {
    pub(crate) fn new(method: Method, url: String, ok: &'static [u16], context: String) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            ok,
            context,
        }
    }

    pub(crate) fn header(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }

    pub(crate) fn body(mut self, data: Bytes) -> Self {
        self.body = Some(data);
        self
    }
}

pub(crate) struct Reply {
    pub headers: HeaderMap,
    pub content: Bytes,
    pub metadata: Metadata,
}

impl Store {
    pub fn new(
        provider: Provider,
        credentials: Credentials,
        token: CancellationToken,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(POOL + 1)
            .build()?;

        let signer = Signer::new(&provider.region, &credentials.account, &credentials.secret);

        Ok(Self {
            http,
            provider,
            signer,
            token,
        })
    }

    pub(crate) fn provider(&self) -> &Provider {
        &self.provider
    }

    pub(crate) async fn dispatch(&self, call: &Call) -> Result<Reply, StoreError> {
        let mut retries = RetryPolicy::default();
        loop {
            match self.attempt(call).await {
                Ok(reply) => return Ok(reply),
                Err(cause) => match retries.backoff(&cause) {
                    Some(delay) => {
                        warn!("retrying request: {cause}");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(cause),
                },
            }
        }
    }

    async fn attempt(&self, call: &Call) -> Result<Reply, StoreError> {
        if self.token.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let mut request = self.http.request(call.method.clone(), &call.url).build()?;

        for (name, value) in &call.headers {
            request.headers_mut().insert(
                HeaderName::from_static(*name),
                HeaderValue::from_str(value)
                    .map_err(|_| StoreError::Decode(format!("invalid header '{name}'")))?,
            );
        }


        let body_hash = match &call.body {
            Some(data) => {
                request.headers_mut().insert(
                    CONTENT_LENGTH,
                    HeaderValue::from_str(&data.len().to_string())
                        .map_err(|_| StoreError::Decode("invalid content length".to_string()))?,
                );
                *request.body_mut() = Some(reqwest::Body::from(data.clone()));
                hex::encode(Sha256::digest(data))
            }
            None => auth::EMPTY_HASH.to_string(),
        };

        self.signer.sign(&mut request, &body_hash, Utc::now())?;

        let response = tokio::select! {
            response = self.http.execute(request) => response?,
            _ = self.token.cancelled() => return Err(StoreError::Cancelled),
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let metadata = Metadata::from_headers(&headers);

        let content = tokio::select! {
            content = response.bytes() => content?,
            _ = self.token.cancelled() => return Err(StoreError::Cancelled),
        };

        if !call.ok.contains(&status) {
            return Err(StoreError::Status {
                context: call.context.clone(),
                status,
                message: String::from_utf8_lossy(&content).trim().to_string(),
                request_id: metadata.request.clone(),
            });
        }

        Ok(Reply {
            headers,
            content,
            metadata,
        })
    }
}

#[async_trait]
impl ObjectStore for Store {
    async fn list_all_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        Store::list_all_keys(self, bucket).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutObjectOutput, StoreError> {
        Store::put_object(self, bucket, key, data).await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> Result<GetObjectOutput, StoreError> {
        Store::get_object(self, bucket, key, range).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        Store::delete_object(self, bucket, key).await
    }

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<CreateMultipartOutput, StoreError> {
        Store::create_multipart(self, bucket, key).await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<UploadPartOutput, StoreError> {
        Store::upload_part(self, bucket, key, upload_id, part_number, data).await
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<Part>,
    ) -> Result<CompleteMultipartOutput, StoreError> {
        Store::complete_multipart(self, bucket, key, upload_id, parts).await
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<AbortMultipartOutput, StoreError> {
        Store::abort_multipart(self, bucket, key, upload_id).await
    }
}
