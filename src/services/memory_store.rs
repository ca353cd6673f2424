//! In-memory `ObjectStore` used by the unit tests.
//!
//! Records every call so tests can assert on exactly what touched storage,
//! and lets individual operations or keys be made to fail.

use super::storage_service::{ObjectStore, StorageError, StorageResult};
use crate::models::object::{EndpointRole, ListPage, ObjectDescriptor, ObjectPayload};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashSet},
    sync::Mutex,
    time::Duration,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Locate,
    List {
        prefix: String,
        max_keys: Option<i32>,
    },
    Get(String),
    Put(String),
    Delete(String),
}

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
}

pub struct MemoryStore {
    role: EndpointRole,
    bucket: String,
    page_size: usize,
    latency: Option<Duration>,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    calls: Mutex<Vec<Call>>,
    failing_keys: Mutex<HashSet<String>>,
    fail_locate: bool,
    fail_listing: bool,
    fail_puts: bool,
    fail_deletes: bool,
}

impl MemoryStore {
    pub fn new(role: EndpointRole) -> Self {
        Self {
            role,
            bucket: format!("{role}-bucket"),
            page_size: 1000,
            latency: None,
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failing_keys: Mutex::new(HashSet::new()),
            fail_locate: false,
            fail_listing: false,
            fail_puts: false,
            fail_deletes: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_locate(mut self) -> Self {
        self.fail_locate = true;
        self
    }

    /// Fail full listings; the validator's one-key probe still succeeds.
    pub fn fail_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn fail_puts(mut self) -> Self {
        self.fail_puts = true;
        self
    }

    pub fn fail_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Make get/put on `key` fail with access denied.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn insert(&self, key: &str, data: &str, content_type: Option<&str>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: Bytes::from(data.to_string()),
                content_type: content_type.map(str::to_owned),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls beyond the validator probes: unbounded listings, gets and puts
    /// of anything that is not a probe object.
    pub fn transfer_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                Call::List { max_keys, .. } => max_keys.is_none(),
                Call::Get(_) => true,
                Call::Put(key) => !key.starts_with(".access-probe-"),
                Call::Locate | Call::Delete(_) => false,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn denied(&self, key: &str) -> StorageError {
        StorageError::AccessDenied {
            bucket: self.bucket.clone(),
            message: format!("injected failure for `{key}`"),
        }
    }

    fn is_failing(&self, key: &str) -> bool {
        self.failing_keys.lock().unwrap().contains(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn role(&self) -> EndpointRole {
        self.role
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn locate(&self) -> StorageResult<String> {
        self.record(Call::Locate);
        if self.fail_locate {
            return Err(StorageError::AccessDenied {
                bucket: self.bucket.clone(),
                message: "invalid credentials".into(),
            });
        }
        Ok("us-east-1".into())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
        max_keys: Option<i32>,
    ) -> StorageResult<ListPage> {
        self.record(Call::List {
            prefix: prefix.to_string(),
            max_keys,
        });
        self.pause().await;
        if self.fail_listing && max_keys.is_none() {
            return Err(StorageError::Service {
                bucket: self.bucket.clone(),
                code: "InternalError".into(),
                message: "listing exploded".into(),
            });
        }

        let limit = max_keys
            .and_then(|m| usize::try_from(m).ok())
            .unwrap_or(self.page_size)
            .min(self.page_size);
        let objects = self.objects.lock().unwrap();
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation_token.as_ref().is_none_or(|t| *key > t));

        let page: Vec<ObjectDescriptor> = matching
            .by_ref()
            .take(limit)
            .map(|(key, obj)| ObjectDescriptor {
                key: key.clone(),
                size: obj.data.len() as i64,
                content_type: None,
                last_modified: None,
            })
            .collect();
        let more = matching.next().is_some();

        Ok(ListPage {
            next_continuation_token: more.then(|| page.last().map(|o| o.key.clone())).flatten(),
            objects: page,
        })
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectPayload> {
        self.record(Call::Get(key.to_string()));
        self.pause().await;
        if self.is_failing(key) {
            return Err(self.denied(key));
        }
        let object = self.object(key).ok_or_else(|| StorageError::NotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })?;
        Ok(ObjectPayload {
            content_length: Some(object.data.len() as i64),
            body: ByteStream::from(object.data),
            content_type: object.content_type,
        })
    }

    async fn put_object(&self, key: &str, payload: ObjectPayload) -> StorageResult<()> {
        self.record(Call::Put(key.to_string()));
        self.pause().await;
        if self.fail_puts || self.is_failing(key) {
            return Err(self.denied(key));
        }
        let data = payload
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Body {
                key: key.to_string(),
                message: err.to_string(),
            })?
            .into_bytes();
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: payload.content_type,
            },
        );
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.record(Call::Delete(key.to_string()));
        if self.fail_deletes {
            return Err(self.denied(key));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}
