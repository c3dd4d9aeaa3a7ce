use super::*;
use crate::store::{
    AttributeValue, AutoRetry, Document, ErrorKind, MemoryStore, StoreClient, StoreError,
    Unprocessed,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

// Scripted reply for one store call. Once a script runs out, calls succeed.
#[derive(Debug, Clone)]
enum Reply {
    Unprocessed(usize),
    // Hands back one write the batch never contained.
    Stray,
    Fail(ErrorKind),
    Transport,
}

#[derive(Default)]
struct ScriptedStore {
    batch_replies: Mutex<VecDeque<Reply>>,
    single_replies: Mutex<VecDeque<Reply>>,
    batch_sizes: Mutex<Vec<usize>>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl ScriptedStore {
    fn new() -> Self {
        Self::default()
    }

    fn batch_script(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.batch_replies.lock().unwrap().extend(replies);
        self
    }

    fn single_script(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.single_replies.lock().unwrap().extend(replies);
        self
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    fn single_reply(&self) -> Result<(), StoreError> {
        match self.single_replies.lock().unwrap().pop_front() {
            Some(Reply::Fail(kind)) => Err(StoreError::classified(kind, "scripted")),
            Some(Reply::Transport) => Err(StoreError::transport("scripted transport failure")),
            Some(Reply::Unprocessed(_) | Reply::Stray) | None => Ok(()),
        }
    }
}

#[async_trait]
impl StoreClient for ScriptedStore {
    async fn batch_execute(
        &self,
        _table: &str,
        writes: &[Document],
        delete_keys: &[Document],
    ) -> Result<Unprocessed, StoreError> {
        self.batch_sizes
            .lock()
            .unwrap()
            .push(writes.len() + delete_keys.len());

        let reply = self.batch_replies.lock().unwrap().pop_front();
        match reply {
            None => Ok(Unprocessed::none()),
            Some(Reply::Fail(kind)) => Err(StoreError::classified(kind, "scripted")),
            Some(Reply::Transport) => Err(StoreError::transport("scripted transport failure")),
            Some(Reply::Stray) => Ok(Unprocessed {
                writes: vec![doc(9999)],
                delete_keys: Vec::new(),
            }),
            Some(Reply::Unprocessed(n)) => {
                // Hand back the last `n` items, writes first.
                let from_writes = n.min(writes.len());
                let from_deletes = (n - from_writes).min(delete_keys.len());
                Ok(Unprocessed {
                    writes: writes[writes.len() - from_writes..].to_vec(),
                    delete_keys: delete_keys[delete_keys.len() - from_deletes..].to_vec(),
                })
            }
        }
    }

    async fn put_one(&self, _table: &str, _doc: &Document) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.single_reply()
    }

    async fn delete_one(&self, _table: &str, _key: &Document) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.single_reply()
    }
}

fn doc(id: usize) -> Document {
    Document::new().with("Id", id).with("Name", format!("User{id}"))
}

fn key(id: usize) -> Document {
    Document::new().with("Id", id)
}

fn config(concurrency: usize, items_per_batch: usize) -> Config {
    ConfigBuilder::default()
        .table("people")
        .concurrency(concurrency)
        .items_per_batch(items_per_batch)
        .build()
        .unwrap()
}

fn collect(writer: &BulkWriter) -> JoinHandle<Vec<BulkResult>> {
    let mut results = writer.results().unwrap();
    tokio::spawn(async move {
        let mut all = Vec::new();
        while let Some(result) = results.recv().await {
            all.push(result);
        }
        all
    })
}

// Sorted ids of every write and delete key across the results.
fn covered_ids(results: &[BulkResult]) -> Vec<usize> {
    let mut ids: Vec<usize> = results
        .iter()
        .flat_map(|r| r.writes.iter().chain(r.delete_keys.iter()))
        .map(|d| match d.get("Id") {
            Some(AttributeValue::N(n)) => n.parse().unwrap(),
            other => panic!("unexpected id {other:?}"),
        })
        .collect();
    ids.sort_unstable();
    ids
}

async fn run_writes(store: Arc<ScriptedStore>, config: Config, count: usize) -> Vec<BulkResult> {
    crate::observability::init_test_tracing();
    let writer = BulkWriter::new(store, config);
    let reader = collect(&writer);
    for i in 0..count {
        writer.write(doc(i)).await.unwrap();
    }
    writer.close_wait().await.unwrap();
    reader.await.unwrap()
}

#[tokio::test]
async fn test_all_writes_accounted_for() {
    let store = Arc::new(ScriptedStore::new());

    let results = run_writes(store.clone(), config(2, 25), 1000).await;

    let sizes = store.batch_sizes();
    assert_eq!(sizes.len(), 40);
    assert!(sizes.iter().all(|&s| s == 25));
    assert!(results.iter().all(BulkResult::is_success));
    assert_eq!(covered_ids(&results), (0..1000).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_mixed_groups_respect_batch_limit() {
    let store = Arc::new(ScriptedStore::new());
    let writer = BulkWriter::new(store.clone(), config(3, 7));
    let reader = collect(&writer);

    for i in 0..100 {
        if i % 4 == 0 {
            writer.delete(key(i)).await.unwrap();
        } else {
            writer.write(doc(i)).await.unwrap();
        }
    }
    writer.close_wait().await.unwrap();
    let results = reader.await.unwrap();

    let sizes = store.batch_sizes();
    assert!(sizes.iter().all(|s| (1..=7).contains(s)));
    assert_eq!(sizes.iter().sum::<usize>(), 100);
    assert_eq!(covered_ids(&results), (0..100).collect::<Vec<_>>());
    assert_eq!(
        results.iter().map(|r| r.delete_keys.len()).sum::<usize>(),
        25
    );
}

#[tokio::test(start_paused = true)]
async fn test_unprocessed_items_retry_then_fall_back() {
    let store = Arc::new(
        ScriptedStore::new().batch_script([Reply::Unprocessed(5), Reply::Unprocessed(5)]),
    );
    let start = Instant::now();

    let results = run_writes(store.clone(), config(1, 25), 25).await;

    // 25 sent, 5 handed back and resent, no progress, then one by one.
    assert_eq!(store.batch_sizes(), vec![25, 5]);
    assert_eq!(store.puts.load(Ordering::SeqCst), 5);
    assert!(start.elapsed() >= Duration::from_millis(100));

    let mut lens: Vec<_> = results.iter().map(BulkResult::len).collect();
    lens.sort_unstable();
    assert_eq!(lens, vec![1, 1, 1, 1, 1, 20]);
    assert!(results.iter().all(BulkResult::is_success));
    assert_eq!(covered_ids(&results), (0..25).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_shrinking_group_stops_at_attempt_cap() {
    let store = Arc::new(ScriptedStore::new().batch_script([
        Reply::Unprocessed(20),
        Reply::Unprocessed(15),
        Reply::Unprocessed(10),
        Reply::Unprocessed(5),
        Reply::Unprocessed(3),
    ]));

    let results = run_writes(store.clone(), config(1, 25), 25).await;

    assert_eq!(store.batch_sizes(), vec![25, 20, 15, 10, 5]);
    assert_eq!(store.puts.load(Ordering::SeqCst), 3);
    assert_eq!(covered_ids(&results), (0..25).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_throughput_exceeded_retries_yield_single_result() {
    let store = Arc::new(ScriptedStore::new().batch_script([
        Reply::Fail(ErrorKind::ThroughputExceeded),
        Reply::Fail(ErrorKind::ThroughputExceeded),
    ]));
    let start = Instant::now();

    let results = run_writes(store.clone(), config(1, 25), 25).await;

    // Waits 100ms, then 200ms.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(400));

    assert_eq!(store.batch_sizes(), vec![25, 25, 25]);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert!(results[0].classified.is_none());
    assert_eq!(results[0].writes.len(), 25);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_double_backoff_like_throttling() {
    let store = Arc::new(ScriptedStore::new().batch_script([
        Reply::Fail(ErrorKind::Throttling),
        Reply::Fail(ErrorKind::ServiceUnavailable),
        Reply::Fail(ErrorKind::InternalFailure),
    ]));
    let start = Instant::now();

    let results = run_writes(store.clone(), config(1, 10), 10).await;

    // 100ms + 200ms + 400ms.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(700));
    assert!(elapsed < Duration::from_millis(800));
    assert_eq!(store.batch_sizes(), vec![10, 10, 10, 10]);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
}

#[tokio::test(start_paused = true)]
async fn test_items_not_in_batch_are_never_reported() {
    let store = Arc::new(ScriptedStore::new().batch_script([Reply::Stray]));
    let start = Instant::now();

    let results = run_writes(store.clone(), config(1, 25), 25).await;

    assert_eq!(store.batch_sizes(), vec![25]);
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(results.iter().all(BulkResult::is_success));
    assert_eq!(covered_ids(&results), (0..25).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_terminal_error_reports_whole_group() {
    let store = Arc::new(ScriptedStore::new().batch_script([Reply::Fail(ErrorKind::Validation)]));

    let results = run_writes(store.clone(), config(1, 25), 25).await;

    assert_eq!(store.batch_sizes(), vec![25]);
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].len(), 25);
    assert!(results[0].error.is_some());
    assert_eq!(
        results[0].classified.as_ref().map(|c| c.kind.clone()),
        Some(ErrorKind::Validation)
    );
}

#[tokio::test]
async fn test_transport_error_is_terminal_and_unclassified() {
    let store = Arc::new(ScriptedStore::new().batch_script([Reply::Transport]));

    let results = run_writes(store.clone(), config(1, 10), 10).await;

    assert_eq!(store.batch_sizes(), vec![10]);
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].error, Some(StoreError::Transport(_))));
    assert!(results[0].classified.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_carries_into_single_item_phase() {
    let store = Arc::new(
        ScriptedStore::new()
            .batch_script([
                Reply::Fail(ErrorKind::Throttling),
                Reply::Fail(ErrorKind::Throttling),
            ])
            .single_script([Reply::Fail(ErrorKind::Throttling)]),
    );
    let config = ConfigBuilder::default()
        .table("people")
        .base_backoff(Duration::from_millis(10))
        .max_batch_attempts(2usize)
        .build()
        .unwrap();
    let start = Instant::now();

    let results = run_writes(store.clone(), config, 1).await;

    // Batch phase sleeps 10ms and 20ms; the single put keeps going at 40ms.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(70));
    assert!(elapsed < Duration::from_millis(80));
    assert_eq!(store.batch_sizes(), vec![1, 1]);
    assert_eq!(store.puts.load(Ordering::SeqCst), 2);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_resets_for_each_group() {
    let store = Arc::new(ScriptedStore::new().batch_script([
        Reply::Fail(ErrorKind::Throttling),
        Reply::Unprocessed(0),
        Reply::Fail(ErrorKind::Throttling),
    ]));
    let start = Instant::now();

    let results = run_writes(store.clone(), config(1, 1), 2).await;

    // Each group waits the 100ms base once; no 200ms carry-over.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(300));
    assert_eq!(store.batch_sizes(), vec![1, 1, 1, 1]);
    assert_eq!(covered_ids(&results), vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_single_item_terminal_failure() {
    let store = Arc::new(
        ScriptedStore::new()
            .batch_script([Reply::Unprocessed(2)])
            .single_script([Reply::Fail(ErrorKind::ConditionalCheckFailed)]),
    );

    let results = run_writes(store.clone(), config(1, 2), 2).await;

    assert_eq!(store.batch_sizes(), vec![2]);
    assert_eq!(store.puts.load(Ordering::SeqCst), 2);
    let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].len(), 1);
    assert_eq!(
        failed[0].classified.as_ref().map(|c| c.kind.clone()),
        Some(ErrorKind::ConditionalCheckFailed)
    );
    assert_eq!(covered_ids(&results), vec![0, 1]);
}

#[tokio::test]
async fn test_delete_keys_fall_back_to_single_deletes() {
    let store = Arc::new(ScriptedStore::new().batch_script([Reply::Unprocessed(3)]));
    let writer = BulkWriter::new(store.clone(), config(1, 3));
    let reader = collect(&writer);

    for i in 0..3 {
        writer.delete(key(i)).await.unwrap();
    }
    writer.close_wait().await.unwrap();
    let results = reader.await.unwrap();

    assert_eq!(store.deletes.load(Ordering::SeqCst), 3);
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.delete_keys.len() == 1 && r.writes.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_throttled_single_delete_is_retried() {
    let store = Arc::new(
        ScriptedStore::new()
            .batch_script([Reply::Unprocessed(2)])
            .single_script([Reply::Fail(ErrorKind::Throttling)]),
    );
    let writer = BulkWriter::new(store.clone(), config(1, 2));
    let reader = collect(&writer);
    let start = Instant::now();

    writer.delete(key(1)).await.unwrap();
    writer.delete(key(2)).await.unwrap();
    writer.close_wait().await.unwrap();
    let results = reader.await.unwrap();

    assert_eq!(store.batch_sizes(), vec![2]);
    assert_eq!(store.deletes.load(Ordering::SeqCst), 3);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(BulkResult::is_success));
    assert_eq!(covered_ids(&results), vec![1, 2]);
}

// Holds every batch call until the test opens the gate.
struct GatedStore {
    gate: Semaphore,
}

#[async_trait]
impl StoreClient for GatedStore {
    async fn batch_execute(
        &self,
        _table: &str,
        _writes: &[Document],
        _delete_keys: &[Document],
    ) -> Result<Unprocessed, StoreError> {
        let _permit = self.gate.acquire().await.map_err(StoreError::transport)?;
        Ok(Unprocessed::none())
    }

    async fn put_one(&self, _table: &str, _doc: &Document) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete_one(&self, _table: &str, _key: &Document) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_ingress_holds_ten_items_per_worker() {
    let store = Arc::new(GatedStore {
        gate: Semaphore::new(0),
    });
    let writer = BulkWriter::new(store.clone(), config(2, 1));
    let reader = collect(&writer);

    let mut accepted = 0;
    for i in 0..100 {
        let sent = tokio::time::timeout(Duration::from_millis(10), writer.write(doc(i))).await;
        if sent.is_err() {
            break;
        }
        accepted += 1;
    }

    // 20 queued, plus one group per blocked worker, one parked in the group
    // channel and one held by the batcher.
    assert_eq!(writer.config().ingress_capacity(), 20);
    assert_eq!(accepted, 20 + 2 + 1 + 1);

    store.gate.add_permits(1);
    writer.close_wait().await.unwrap();
    assert_eq!(covered_ids(&reader.await.unwrap()), (0..accepted).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_close_wait_twice_is_an_error() {
    let writer = BulkWriter::new(Arc::new(ScriptedStore::new()), config(1, 25));
    let reader = collect(&writer);

    writer.close_wait().await.unwrap();
    assert!(matches!(
        writer.close_wait().await,
        Err(BulkError::AlreadyClosed)
    ));
    assert!(reader.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_submit_after_close_is_rejected() {
    let writer = BulkWriter::new(Arc::new(ScriptedStore::new()), config(1, 25));
    let _reader = collect(&writer);

    writer.close_wait().await.unwrap();

    assert!(writer.is_closed());
    assert!(matches!(writer.write(doc(1)).await, Err(BulkError::Closed)));
    assert!(matches!(writer.delete(key(1)).await, Err(BulkError::Closed)));
}

#[tokio::test]
async fn test_results_handed_out_once() {
    let writer = BulkWriter::new(Arc::new(ScriptedStore::new()), config(1, 25));
    let _reader = collect(&writer);

    assert!(matches!(writer.results(), Err(BulkError::ResultsTaken)));
    writer.close_wait().await.unwrap();
}

#[tokio::test]
async fn test_unread_results_apply_backpressure() {
    let writer = BulkWriter::new(Arc::new(ScriptedStore::new()), config(1, 1));

    let blocked = tokio::time::timeout(Duration::from_millis(200), async {
        for i in 0..100 {
            writer.write(doc(i)).await.unwrap();
        }
    })
    .await;
    assert!(blocked.is_err(), "writes should stall while results are unread");

    let reader = collect(&writer);
    writer.close_wait().await.unwrap();
    let results = reader.await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(BulkResult::is_success));
}

#[tokio::test]
async fn test_result_stream_implements_stream() {
    let writer = BulkWriter::new(Arc::new(ScriptedStore::new()), config(1, 5));
    let results = writer.results().unwrap();
    let reader = tokio::spawn(results.collect::<Vec<_>>());

    for i in 0..12 {
        writer.write(doc(i)).await.unwrap();
    }
    writer.close_wait().await.unwrap();

    let results = reader.await.unwrap();
    let mut lens: Vec<_> = results.iter().map(BulkResult::len).collect();
    lens.sort_unstable();
    assert_eq!(lens, vec![2, 5, 5]);
}

#[tokio::test]
async fn test_loads_into_memory_store() {
    let store = Arc::new(MemoryStore::new(["Id"]));
    let client: Arc<dyn StoreClient> = Arc::new(AutoRetry::new(store.clone(), 3));
    let writer = BulkWriter::new(client, config(4, 25));
    let reader = collect(&writer);

    for i in 0..500 {
        writer.write(doc(i)).await.unwrap();
    }
    writer.close_wait().await.unwrap();
    let results = reader.await.unwrap();

    assert!(results.iter().all(BulkResult::is_success));
    assert_eq!(store.len("people").await, 500);
    assert_eq!(store.get("people", &key(42)).await, Some(doc(42)));

    // Second pass removes every even id.
    let writer = BulkWriter::new(store.clone(), config(2, 25));
    let reader = collect(&writer);
    for i in (0..500).step_by(2) {
        writer.delete(key(i)).await.unwrap();
    }
    writer.close_wait().await.unwrap();
    reader.await.unwrap();

    assert_eq!(store.len("people").await, 250);
    assert_eq!(store.get("people", &key(42)).await, None);
    assert_eq!(store.get("people", &key(43)).await, Some(doc(43)));
}
