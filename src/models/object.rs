//! Represents objects as seen through a storage endpoint.

use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Which of the two configured endpoints a store talks to.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    Source,
    Destination,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Source => f.write_str("source"),
            EndpointRole::Destination => f.write_str("destination"),
        }
    }
}

/// A single listed object (blob) within the source bucket.
///
/// Only lives for the duration of one copy run. Listing never reports the
/// content type, so `content_type` is filled in only when a store knows it.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ObjectDescriptor {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size: i64,

    /// Content type (MIME type), if known.
    pub content_type: Option<String>,

    /// Timestamp when object was last modified.
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a listing plus the token for the next page, if any.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectDescriptor>,
    pub next_continuation_token: Option<String>,
}

/// An object body in flight between two stores.
///
/// The body is a byte stream: a GET response is piped straight into the
/// matching PUT without collecting it in memory.
#[derive(Debug)]
pub struct ObjectPayload {
    pub body: ByteStream,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
}
