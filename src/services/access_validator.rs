//! Pre-flight checks run before any object is copied.
//!
//! - Source: bucket location, then a one-key listing.
//! - Destination: bucket location, a one-key listing, a probe write and the
//!   probe's removal.
//!
//! Each side is checked with its own store, so its own credentials are the
//! ones being exercised.

use super::storage_service::{ObjectStore, StorageResult};
use crate::models::object::ObjectPayload;
use aws_sdk_s3::primitives::ByteStream;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

const PROBE_BODY: &str = "access probe written to validate write permissions";

#[derive(Clone)]
pub struct AccessValidator {
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
}

impl AccessValidator {
    pub fn new(source: Arc<dyn ObjectStore>, destination: Arc<dyn ObjectStore>) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// `true` when the source bucket is reachable and listable.
    ///
    /// Failures are logged and reported as `false`, never propagated.
    pub async fn validate_source(&self) -> bool {
        let store = self.source.as_ref();
        match probe_read(store).await {
            Ok(region) => {
                info!(
                    bucket = store.bucket(),
                    region = %region,
                    "source endpoint validated"
                );
                true
            }
            Err(err) => {
                error!(bucket = store.bucket(), error = %err, "source endpoint validation failed");
                false
            }
        }
    }

    /// `true` when the destination bucket is reachable and writable.
    ///
    /// The probe object is deleted afterwards; a failed delete is logged but
    /// does not fail validation since the write itself already succeeded.
    pub async fn validate_destination(&self) -> bool {
        let store = self.destination.as_ref();
        let region = match probe_read(store).await {
            Ok(region) => region,
            Err(err) => {
                error!(
                    bucket = store.bucket(),
                    error = %err,
                    "destination endpoint validation failed"
                );
                return false;
            }
        };

        let probe_key = format!(".access-probe-{}", Uuid::new_v4());
        let payload = ObjectPayload {
            body: ByteStream::from_static(PROBE_BODY.as_bytes()),
            content_type: Some("text/plain".into()),
            content_length: Some(PROBE_BODY.len() as i64),
        };
        if let Err(err) = store.put_object(&probe_key, payload).await {
            error!(
                bucket = store.bucket(),
                key = %probe_key,
                error = %err,
                "destination endpoint validation failed: probe write rejected"
            );
            return false;
        }

        if let Err(err) = store.delete_object(&probe_key).await {
            error!(
                bucket = store.bucket(),
                key = %probe_key,
                error = %err,
                "could not remove access probe object"
            );
        }

        info!(
            bucket = store.bucket(),
            region = %region,
            "destination endpoint validated"
        );
        true
    }
}

/// Location lookup plus a bounded listing.
async fn probe_read(store: &dyn ObjectStore) -> StorageResult<String> {
    debug!(role = %store.role(), bucket = store.bucket(), "probing endpoint");
    let region = store.locate().await?;
    store.list_page("", None, Some(1)).await?;
    Ok(region)
}
