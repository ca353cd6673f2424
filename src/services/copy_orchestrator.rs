//! src/services/copy_orchestrator.rs
//!
//! CopyOrchestrator drives one bulk copy run from validation to summary.
//!
//! A run moves through `Validating -> Listing -> Copying -> Completed`, or
//! stops at `Aborted` when either endpoint fails validation or the listing
//! errors. Per-object transfers run on a bounded pool: at most `concurrency`
//! tasks are in flight, and a failing object never affects its siblings.

use super::{
    access_validator::AccessValidator,
    key_translator::{normalize_prefix, translate},
    storage_service::{ObjectStore, StorageError, list_objects},
};
use crate::models::{
    copy::{CopyOptions, CopyRunResult, CopyTask, RunPhase},
    object::ObjectDescriptor,
};
use futures::TryStreamExt;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Why a single object could not be copied.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("worker pool closed")]
    PoolClosed,
}

/// Knobs that apply to every run of an orchestrator.
#[derive(Clone, Debug)]
pub struct CopySettings {
    /// Extension applied to destination keys, if any.
    pub extension: Option<String>,
    /// Upper bound on concurrently running transfers.
    pub concurrency: usize,
    /// Hard limit on the wall-clock duration of a run.
    pub deadline: Duration,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            extension: None,
            concurrency: 16,
            deadline: Duration::from_secs(3600),
        }
    }
}

type PairKey = (String, String);

/// Serializes runs over the same (source prefix, destination prefix) pair.
#[derive(Clone, Default)]
struct PrefixLocks {
    inner: Arc<Mutex<HashMap<PairKey, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of a run; drops the map entry once unused.
struct PrefixLease {
    locks: PrefixLocks,
    key: PairKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PrefixLocks {
    async fn acquire(&self, key: PairKey) -> PrefixLease {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        PrefixLease {
            locks: self.clone(),
            key,
            guard: Some(guard),
        }
    }

    /// Drop the entry for `key` if nobody holds or waits on it.
    fn prune(&self, key: &PairKey) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(key);
        }
    }
}

impl Drop for PrefixLease {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.prune(&self.key);
    }
}

/// Copies every object under a source prefix to a destination prefix.
#[derive(Clone)]
pub struct CopyOrchestrator {
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    validator: AccessValidator,
    settings: CopySettings,
    locks: PrefixLocks,
}

impl CopyOrchestrator {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        destination: Arc<dyn ObjectStore>,
        settings: CopySettings,
    ) -> Self {
        Self {
            validator: AccessValidator::new(source.clone(), destination.clone()),
            source,
            destination,
            settings,
            locks: PrefixLocks::default(),
        }
    }

    /// Run one bulk copy to completion.
    ///
    /// Never returns an error: validation and listing failures become an
    /// unsuccessful result, per-object failures are counted. The deadline
    /// starts before the prefix lock is taken. Cancelling `cancel`, or hitting
    /// the deadline, ends the run in whatever phase it is in; objects not yet
    /// copied count as failures.
    pub async fn run(
        &self,
        source_path: &str,
        destination_path: &str,
        options: CopyOptions,
        cancel: CancellationToken,
    ) -> CopyRunResult {
        let source_prefix = normalize_prefix(source_path);
        let destination_prefix = normalize_prefix(destination_path);

        let cancel = cancel.child_token();
        let watchdog = spawn_deadline(cancel.clone(), self.settings.deadline);

        let key = (source_prefix.clone(), destination_prefix.clone());
        let lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            lease = self.locks.acquire(key.clone()) => Some(lease),
        };
        let result = match lease {
            Some(_lease) => {
                self.run_phases(&source_prefix, &destination_prefix, options, &cancel)
                    .await
            }
            None => {
                self.locks.prune(&key);
                error!(
                    source_prefix = %source_prefix,
                    destination_prefix = %destination_prefix,
                    "copy run cancelled while waiting for the prefix lock"
                );
                cancelled_result("cancelled while waiting for the prefix lock")
            }
        };
        watchdog.abort();
        result
    }

    async fn run_phases(
        &self,
        source_prefix: &str,
        destination_prefix: &str,
        options: CopyOptions,
        cancel: &CancellationToken,
    ) -> CopyRunResult {
        let mut phase = RunPhase::Idle;
        let mut advance = |next: RunPhase| {
            debug!(from = %phase, to = %next, source_prefix, "copy run phase");
            phase = next;
        };

        advance(RunPhase::Validating);
        let validation = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            failed = self.validate() => Some(failed),
        };
        let Some(failed_side) = validation else {
            advance(RunPhase::Aborted);
            error!(source_prefix, "copy run cancelled while validating endpoints");
            return cancelled_result("cancelled while validating");
        };
        if let Some(side) = failed_side {
            advance(RunPhase::Aborted);
            error!(
                endpoint = side,
                "{side} endpoint validation failed, aborting copy operation"
            );
            return CopyRunResult::aborted(
                "validation failed",
                Some(format!("{side} endpoint validation failed")),
            );
        }

        advance(RunPhase::Listing);
        info!(
            source_prefix,
            destination_prefix,
            "starting to copy from {source_prefix} to {destination_prefix}"
        );
        let listing = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(None),
            res = list_objects(self.source.as_ref(), source_prefix).try_collect::<Vec<_>>() => {
                res.map_err(Some)
            }
        };
        let objects = match listing {
            Ok(objects) => objects,
            Err(err) => {
                advance(RunPhase::Aborted);
                let Some(err) = err else {
                    error!(source_prefix, "copy run cancelled while listing");
                    return cancelled_result("cancelled while listing");
                };
                error!(source_prefix, error = %err, "listing source objects failed");
                return CopyRunResult::aborted(err.to_string(), Some(format!("{err:?}")));
            }
        };

        if objects.is_empty() {
            advance(RunPhase::Completed);
            error!(source_prefix, "no objects found in source path {source_prefix}");
            return CopyRunResult::aborted("no objects found", None);
        }

        advance(RunPhase::Copying);
        let total_bytes: i64 = objects.iter().map(|obj| obj.size).sum();
        info!(
            count = objects.len(),
            bytes = total_bytes,
            "found {} objects to copy",
            objects.len()
        );
        let tasks = objects
            .into_iter()
            .map(|obj| self.plan(obj, source_prefix, destination_prefix, &options))
            .collect();
        let tally = self.copy_all(tasks, cancel).await;
        advance(if tally.cancelled > 0 {
            RunPhase::Aborted
        } else {
            RunPhase::Completed
        });
        tally.into_result()
    }

    /// Check both endpoints, returning the side that failed.
    async fn validate(&self) -> Option<&'static str> {
        if !self.validator.validate_source().await {
            return Some("source");
        }
        if !self.validator.validate_destination().await {
            return Some("destination");
        }
        None
    }

    fn plan(
        &self,
        object: ObjectDescriptor,
        source_prefix: &str,
        destination_prefix: &str,
        options: &CopyOptions,
    ) -> CopyTask {
        let destination_key = translate(
            &object.key,
            source_prefix,
            destination_prefix,
            options,
            self.settings.extension.as_deref(),
        );
        CopyTask {
            source_key: object.key,
            destination_key,
        }
    }

    /// Execute every task on the bounded pool and tally the outcomes.
    async fn copy_all(&self, tasks: Vec<CopyTask>, cancel: &CancellationToken) -> Tally {
        let total = tasks.len();
        let permits = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut in_flight = JoinSet::new();
        let mut tally = Tally::default();

        for task in tasks {
            let acquired = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = permits.clone().acquire_owned() => Some(permit),
            };
            let permit = match acquired {
                Some(Ok(permit)) => permit,
                Some(Err(_)) => {
                    tally.record(&task, Err(TransferError::PoolClosed));
                    continue;
                }
                None => {
                    tally.record(&task, Err(TransferError::Cancelled));
                    continue;
                }
            };

            let source = self.source.clone();
            let destination = self.destination.clone();
            let cancel = cancel.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(TransferError::Cancelled),
                    res = copy_object(source.as_ref(), destination.as_ref(), &task) => res,
                };
                (task, outcome)
            });

            while let Some(joined) = in_flight.try_join_next() {
                tally.joined(joined);
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            tally.joined(joined);
        }

        debug_assert_eq!(tally.succeeded + tally.failed, total);
        tally
    }
}

const CANCELLED_MESSAGE: &str = "copy operation cancelled";

fn cancelled_result(details: &str) -> CopyRunResult {
    CopyRunResult::aborted(CANCELLED_MESSAGE, Some(details.to_string()))
}

/// Pipe one object from source to destination, keeping its content type.
async fn copy_object(
    source: &dyn ObjectStore,
    destination: &dyn ObjectStore,
    task: &CopyTask,
) -> Result<(), TransferError> {
    let payload = source.get_object(&task.source_key).await?;
    destination
        .put_object(&task.destination_key, payload)
        .await?;
    Ok(())
}

/// Cancel `cancel` once `deadline` elapses, unless it is cancelled first.
fn spawn_deadline(cancel: CancellationToken, deadline: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                error!(deadline_secs = deadline.as_secs(), "copy run hit its deadline, cancelling");
                cancel.cancel();
            }
        }
    })
}

#[derive(Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
    /// Failures caused by cancellation rather than storage.
    cancelled: usize,
}

impl Tally {
    fn record(&mut self, task: &CopyTask, outcome: Result<(), TransferError>) {
        match outcome {
            Ok(()) => {
                self.succeeded += 1;
                info!(
                    source_key = %task.source_key,
                    destination_key = %task.destination_key,
                    "copied: {} -> {}",
                    task.source_key,
                    task.destination_key
                );
            }
            Err(err) => {
                self.failed += 1;
                if matches!(err, TransferError::Cancelled) {
                    self.cancelled += 1;
                }
                let transient = matches!(&err, TransferError::Storage(e) if e.is_transient());
                error!(
                    source_key = %task.source_key,
                    destination_key = %task.destination_key,
                    transient,
                    error = %err,
                    "failed to copy file {}",
                    task.source_key
                );
            }
        }
    }

    /// Only objects actually cut short by cancellation mark the run as
    /// cancelled; a deadline that fires after the last object landed does not.
    fn into_result(self) -> CopyRunResult {
        let mut result = CopyRunResult::completed(self.succeeded, self.failed);
        if self.cancelled > 0 {
            result.success = false;
            result.message = CANCELLED_MESSAGE.into();
            result.error_details = Some("cancelled while copying".into());
        }
        result
    }

    fn joined(
        &mut self,
        joined: Result<(CopyTask, Result<(), TransferError>), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((task, outcome)) => self.record(&task, outcome),
            Err(err) => {
                // The task is gone along with its key; only the count survives.
                self.failed += 1;
                error!(error = %err, "copy task panicked or was aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::object::EndpointRole,
        services::memory_store::{Call, MemoryStore},
    };

    struct Fixture {
        source: Arc<MemoryStore>,
        destination: Arc<MemoryStore>,
        orchestrator: CopyOrchestrator,
    }

    fn fixture(source: MemoryStore, destination: MemoryStore, settings: CopySettings) -> Fixture {
        let source = Arc::new(source);
        let destination = Arc::new(destination);
        Fixture {
            orchestrator: CopyOrchestrator::new(source.clone(), destination.clone(), settings),
            source,
            destination,
        }
    }

    fn stores() -> (MemoryStore, MemoryStore) {
        (
            MemoryStore::new(EndpointRole::Source),
            MemoryStore::new(EndpointRole::Destination),
        )
    }

    #[tokio::test]
    async fn copies_every_object_under_prefix() {
        let (source, destination) = stores();
        source.insert("in/a.csv", "a", Some("text/csv"));
        source.insert("in/nested/b", "b", None);
        source.insert("elsewhere/c", "c", None);
        let f = fixture(
            source.with_page_size(1),
            destination,
            CopySettings {
                extension: Some(".json".into()),
                ..CopySettings::default()
            },
        );

        let result = f
            .orchestrator
            .run("in", "out", CopyOptions::default(), CancellationToken::new())
            .await;

        assert_eq!(result, CopyRunResult::completed(2, 0));
        let copied = f.destination.object("out/a.csv").unwrap();
        assert_eq!(copied.data.as_ref(), b"a");
        assert_eq!(copied.content_type.as_deref(), Some("text/csv"));
        assert!(f.destination.object("out/nested/b.json").is_some());
        assert!(f.destination.object("out/c").is_none());
    }

    #[tokio::test]
    async fn partial_failure_keeps_counting() {
        let (source, destination) = stores();
        for i in 0..10 {
            source.insert(&format!("in/{i}"), "x", None);
        }
        source.fail_key("in/3");
        let f = fixture(
            source,
            destination,
            CopySettings {
                concurrency: 3,
                ..CopySettings::default()
            },
        );

        let result = f
            .orchestrator
            .run("in/", "out/", CopyOptions::default(), CancellationToken::new())
            .await;

        assert!(result.success);
        assert_eq!(result.success_count, 9);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.total_count, 10);
        assert_eq!(result.success_count + result.failure_count, result.total_count);
        let gets = f
            .source
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Get(_)))
            .count();
        assert_eq!(gets, 10);
    }

    #[tokio::test]
    async fn mixed_read_and_write_failures_are_all_counted() {
        let (source, destination) = stores();
        for i in 0..8 {
            source.insert(&format!("in/{i}"), "x", None);
        }
        source.fail_key("in/1");
        source.fail_key("in/5");
        destination.fail_key("out/2");
        destination.fail_key("out/6");
        destination.fail_key("out/7");
        let f = fixture(
            source,
            destination,
            CopySettings {
                concurrency: 4,
                ..CopySettings::default()
            },
        );

        let result = f
            .orchestrator
            .run("in", "out", CopyOptions::default(), CancellationToken::new())
            .await;

        assert!(result.success);
        assert_eq!(result.success_count, 3);
        assert_eq!(result.failure_count, 5);
        assert_eq!(result.total_count, 8);
        assert_eq!(f.destination.keys(), vec!["out/0", "out/3", "out/4"]);
    }

    #[tokio::test]
    async fn empty_listing_launches_nothing() {
        let (source, destination) = stores();
        let f = fixture(source, destination, CopySettings::default());

        let result = f
            .orchestrator
            .run("in", "out", CopyOptions::default(), CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.total_count, 0);
        assert_eq!(result.message, "no objects found");
        assert!(!f.source.calls().iter().any(|c| matches!(c, Call::Get(_))));
    }

    #[tokio::test]
    async fn source_validation_failure_touches_nothing() {
        let (source, destination) = stores();
        source.insert("in/a", "a", None);
        let f = fixture(source.fail_locate(), destination, CopySettings::default());

        let result = f
            .orchestrator
            .run("in", "out", CopyOptions::default(), CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.message, "validation failed");
        assert!(f.source.transfer_calls().is_empty());
        assert!(f.destination.calls().is_empty());
    }

    #[tokio::test]
    async fn destination_validation_failure_touches_nothing() {
        let (source, destination) = stores();
        source.insert("in/a", "a", None);
        let f = fixture(source, destination.fail_locate(), CopySettings::default());

        let result = f
            .orchestrator
            .run("in", "out", CopyOptions::default(), CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(
            result.error_details.as_deref(),
            Some("destination endpoint validation failed")
        );
        assert!(f.source.transfer_calls().is_empty());
        assert!(f.destination.transfer_calls().is_empty());
    }

    #[tokio::test]
    async fn listing_failure_aborts_run() {
        let (source, destination) = stores();
        source.insert("in/a", "a", None);
        let f = fixture(source.fail_listing(), destination, CopySettings::default());

        let result = f
            .orchestrator
            .run("in", "out", CopyOptions::default(), CancellationToken::new())
            .await;

        assert!(!result.success);
        assert!(result.message.contains("listing exploded"));
        assert!(result.error_details.is_some());
        assert!(!f.source.calls().iter().any(|c| matches!(c, Call::Get(_))));
        assert!(f.destination.transfer_calls().is_empty());
    }

    #[tokio::test]
    async fn cancellation_counts_unfinished_objects_as_failures() {
        let (source, destination) = stores();
        for i in 0..6 {
            source.insert(&format!("in/{i}"), "x", None);
        }
        let f = fixture(
            source.with_latency(Duration::from_millis(100)),
            destination,
            CopySettings {
                concurrency: 2,
                deadline: Duration::from_millis(250),
                ..CopySettings::default()
            },
        );

        let result = f
            .orchestrator
            .run("in", "out", CopyOptions::default(), CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.message, "copy operation cancelled");
        assert_eq!(result.error_details.as_deref(), Some("cancelled while copying"));
        assert_eq!(result.total_count, 6);
        assert_eq!(result.success_count + result.failure_count, 6);
        assert!(result.failure_count > 0);
    }

    #[tokio::test]
    async fn deadline_bounds_a_hung_validation() {
        let (source, destination) = stores();
        source.insert("in/a", "a", None);
        let f = fixture(
            source.with_latency(Duration::from_millis(1500)),
            destination,
            CopySettings {
                deadline: Duration::from_millis(100),
                ..CopySettings::default()
            },
        );

        let started = tokio::time::Instant::now();
        let result = f
            .orchestrator
            .run("in", "out", CopyOptions::default(), CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(!result.success);
        assert_eq!(result.message, "copy operation cancelled");
        assert_eq!(result.error_details.as_deref(), Some("cancelled while validating"));
        assert!(f.source.transfer_calls().is_empty());
        assert!(f.destination.calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_never_touches_storage() {
        let (source, destination) = stores();
        source.insert("in/a", "a", None);
        let f = fixture(source, destination, CopySettings::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = f
            .orchestrator
            .run("in", "out", CopyOptions::default(), cancel)
            .await;

        assert!(!result.success);
        assert_eq!(result.message, "copy operation cancelled");
        assert!(f.source.calls().is_empty());
        assert!(f.destination.calls().is_empty());
        assert!(f.orchestrator.locks.inner.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn deadline_bounds_the_wait_for_a_busy_prefix() {
        let (source, destination) = stores();
        source.insert("in/a", "a", None);
        let f = fixture(
            source,
            destination,
            CopySettings {
                deadline: Duration::from_millis(50),
                ..CopySettings::default()
            },
        );

        let held = f
            .orchestrator
            .locks
            .acquire(("in/".to_string(), "out/".to_string()))
            .await;
        let result = f
            .orchestrator
            .run("in", "out", CopyOptions::default(), CancellationToken::new())
            .await;

        assert_eq!(
            result.error_details.as_deref(),
            Some("cancelled while waiting for the prefix lock")
        );
        assert!(f.source.calls().is_empty());
        assert!(f.destination.calls().is_empty());

        drop(held);
        assert!(f.orchestrator.locks.inner.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_after_the_last_copy_keeps_the_run_successful() {
        let (source, destination) = stores();
        source.insert("in/a", "a", None);
        source.insert("in/b", "b", None);
        source.fail_key("in/b");
        let f = fixture(source, destination, CopySettings::default());
        let tasks = ["a", "b"]
            .into_iter()
            .map(|name| CopyTask {
                source_key: format!("in/{name}"),
                destination_key: format!("out/{name}"),
            })
            .collect();

        let cancel = CancellationToken::new();
        let tally = f.orchestrator.copy_all(tasks, &cancel).await;
        cancel.cancel();
        let result = tally.into_result();

        assert!(result.success);
        assert_eq!(result.message, "Copy operation completed");
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
    }

    #[tokio::test]
    async fn runs_on_the_same_prefixes_are_serialized() {
        let (source, destination) = stores();
        source.insert("in/a", "a", None);
        let f = fixture(
            source.with_latency(Duration::from_millis(20)),
            destination,
            CopySettings::default(),
        );

        let a = f.orchestrator.clone();
        let b = f.orchestrator.clone();
        let (ra, rb) = tokio::join!(
            a.run("in", "out", CopyOptions::default(), CancellationToken::new()),
            b.run("in/", "out/", CopyOptions::default(), CancellationToken::new()),
        );
        assert_eq!(ra.success_count, 1);
        assert_eq!(rb.success_count, 1);

        // The second run only starts validating once the first has copied.
        let calls = f.source.calls();
        let first_get = calls.iter().position(|c| matches!(c, Call::Get(_))).unwrap();
        let second_locate = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Call::Locate))
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        assert!(first_get < second_locate);
        assert!(f.orchestrator.locks.inner.lock().unwrap().is_empty());
    }
}
