//! src/services/storage_service.rs
//!
//! Storage client facade: the `ObjectStore` trait every endpoint is reached
//! through, plus the S3 implementation built on `aws-sdk-s3`. One store wraps
//! exactly one bucket with its own credentials and region; the service keeps
//! two of them (source and destination) and never shares a client between them.

use crate::{
    config::EndpointConfig,
    models::object::{EndpointRole, ListPage, ObjectDescriptor, ObjectPayload},
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, retry::RetryConfig};
use aws_sdk_s3::{
    Client,
    config::{Credentials, http::HttpResponse},
    error::{ProvideErrorMetadata, SdkError},
};
use chrono::{DateTime, Utc};
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("access denied on bucket `{bucket}`: {message}")]
    AccessDenied { bucket: String, message: String },
    #[error("transient failure talking to bucket `{bucket}`: {message}")]
    Transient { bucket: String, message: String },
    #[error("bucket `{bucket}` returned {code}: {message}")]
    Service {
        bucket: String,
        code: String,
        message: String,
    },
    #[error("body stream for `{key}` failed: {message}")]
    Body { key: String, message: String },
}

impl StorageError {
    /// Whether a second attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient { .. } | StorageError::Body { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// The primitives the copy engine needs from one storage endpoint.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// from many tasks at once; each call maps to one request against real
/// storage and nothing is cached locally.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Which side of the copy this store serves.
    fn role(&self) -> EndpointRole;

    /// Bucket (or container) this store is bound to.
    fn bucket(&self) -> &str;

    /// Look up the bucket's region. Doubles as a credentials check.
    async fn locate(&self) -> StorageResult<String>;

    /// Fetch one page of keys under `prefix`.
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
        max_keys: Option<i32>,
    ) -> StorageResult<ListPage>;

    /// Open an object for reading. The body is streamed, not buffered.
    async fn get_object(&self, key: &str) -> StorageResult<ObjectPayload>;

    /// Write an object, overwriting any existing one under the same key.
    async fn put_object(&self, key: &str, payload: ObjectPayload) -> StorageResult<()>;

    /// Remove an object.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;
}

/// List every object under `prefix`, following continuation tokens lazily.
///
/// Pages are only requested as the stream is polled. The stream is finite and
/// cannot be resumed; calling this again lists from the first page.
pub fn list_objects<'a>(
    store: &'a dyn ObjectStore,
    prefix: &'a str,
) -> BoxStream<'a, StorageResult<ObjectDescriptor>> {
    // `None` state = listing exhausted; `Some(token)` = next page to request.
    stream::try_unfold(Some(None::<String>), move |state| async move {
        let Some(token) = state else {
            return Ok::<_, StorageError>(None);
        };
        let page = store.list_page(prefix, token, None).await?;
        debug!(
            bucket = store.bucket(),
            prefix,
            count = page.objects.len(),
            truncated = page.next_continuation_token.is_some(),
            "listed page"
        );
        let next = page.next_continuation_token.map(Some);
        Ok(Some((page.objects, next)))
    })
    .map_ok(|objects| stream::iter(objects.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}

/// `ObjectStore` backed by an S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    role: EndpointRole,
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .field("role", &self.role)
            .finish()
    }
}

impl S3Store {
    /// Build a client from the endpoint's own credentials and region.
    ///
    /// Falls back to the default AWS credential chain when no access key is
    /// configured. SDK retries are disabled: every request is attempted once.
    pub async fn connect(role: EndpointRole, endpoint: &EndpointConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(endpoint.region.clone()))
            .retry_config(RetryConfig::disabled());

        if let Some(creds) = &endpoint.credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                creds.session_token.clone(),
                None,
                "prefix-relay-env",
            ));
        }

        if let Some(url) = &endpoint.endpoint_url {
            debug!(%role, url = %url, "using custom endpoint");
            loader = loader.endpoint_url(url);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint.force_path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: endpoint.bucket.clone(),
            role,
        }
    }

    fn classify<E>(&self, err: SdkError<E, HttpResponse>, key: Option<&str>) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
    {
        let status = err.raw_response().map(|resp| resp.status().as_u16());
        let code = err.code().map(str::to_owned);
        let message = err
            .message()
            .map(str::to_owned)
            .unwrap_or_else(|| error_chain(&err));

        classify_failure(
            &self.bucket,
            key,
            matches!(
                err,
                SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)
            ),
            status,
            code,
            message,
        )
    }
}

/// Map an SDK failure onto the facade's error kinds.
///
/// Split out of `S3Store::classify` so the mapping can be exercised without
/// fabricating SDK error values.
fn classify_failure(
    bucket: &str,
    key: Option<&str>,
    network: bool,
    status: Option<u16>,
    code: Option<String>,
    message: String,
) -> StorageError {
    if network {
        return StorageError::Transient {
            bucket: bucket.to_string(),
            message,
        };
    }

    match (code.as_deref(), status) {
        (Some("NoSuchKey" | "NotFound" | "NoSuchBucket"), _) | (None, Some(404)) => {
            StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.unwrap_or_default().to_string(),
            }
        }
        (
            Some(
                "AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
                | "ExpiredToken" | "InvalidToken" | "AllAccessDisabled",
            ),
            _,
        )
        | (None, Some(401 | 403)) => StorageError::AccessDenied {
            bucket: bucket.to_string(),
            message,
        },
        (
            Some("SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable"),
            _,
        ) => StorageError::Transient {
            bucket: bucket.to_string(),
            message,
        },
        (_, Some(status)) if status >= 500 => StorageError::Transient {
            bucket: bucket.to_string(),
            message,
        },
        (code, status) => StorageError::Service {
            bucket: bucket.to_string(),
            code: code
                .map(str::to_owned)
                .or_else(|| status.map(|s| format!("HTTP {s}")))
                .unwrap_or_else(|| "Unknown".into()),
            message,
        },
    }
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

#[async_trait]
impl ObjectStore for S3Store {
    fn role(&self) -> EndpointRole {
        self.role
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn locate(&self) -> StorageResult<String> {
        let output = self
            .client
            .get_bucket_location()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| self.classify(err, None))?;

        // An empty constraint is how S3 spells us-east-1.
        Ok(output
            .location_constraint()
            .map(|c| c.as_str().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "us-east-1".into()))
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
        max_keys: Option<i32>,
    ) -> StorageResult<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token)
            .set_max_keys(max_keys)
            .send()
            .await
            .map_err(|err| self.classify(err, None))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_string();
                Some(ObjectDescriptor {
                    key,
                    size: obj.size().unwrap_or_default(),
                    content_type: None,
                    last_modified: obj.last_modified().and_then(|ts| {
                        DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())
                    }),
                })
            })
            .collect();

        Ok(ListPage {
            objects,
            next_continuation_token: output.next_continuation_token().map(str::to_owned),
        })
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectPayload> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| self.classify(err, Some(key)))?;

        let content_type = output.content_type().map(str::to_owned);
        let content_length = output.content_length();
        Ok(ObjectPayload {
            body: output.body,
            content_type,
            content_length,
        })
    }

    async fn put_object(&self, key: &str, payload: ObjectPayload) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(payload.body)
            .set_content_type(payload.content_type)
            .set_content_length(payload.content_length)
            .send()
            .await
            .map_err(|err| self.classify(err, Some(key)))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| self.classify(err, Some(key)))?;
        Ok(())
    }
}
