//! tests/storage_tests.rs
//!
//! Batcher laws: fullness-triggered flushes, interval-triggered flushes,
//! backpressure on a full inbox, and the drain-on-shutdown path. Time is
//! paused, so interval behavior is deterministic.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{sleep, timeout, Duration};

use modtrack::error::Error;
use modtrack::models::{Broadcaster, ModerationEvent, ModerationKind, PersistRecord};
use modtrack::storage::{Driver, Storage};

#[derive(Clone, Default)]
struct MockDriver {
    batches: Arc<Mutex<Vec<Vec<PersistRecord>>>>,
    closed: Arc<Mutex<bool>>,
}

impl MockDriver {
    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn insert_batch(&self, records: &[PersistRecord]) -> Result<(), Error> {
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }

    async fn channels(&self) -> Result<Vec<Broadcaster>, Error> {
        Ok(vec![Broadcaster {
            id: 1,
            name: "somechannel".to_string(),
            lang: "en".to_string(),
        }])
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

fn ban(username: &str) -> ModerationEvent {
    ModerationEvent {
        kind: ModerationKind::Ban,
        channel: "somechannel".to_string(),
        username: username.to_string(),
        duration: 0,
        target_msg_id: None,
        at: Utc::now(),
        attached: Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn capacity_saves_cause_exactly_one_full_flush() {
    let driver = MockDriver::default();
    let mut storage = Storage::new(driver.clone(), 3, Duration::from_secs(3600));
    storage.optimize_channels().await.unwrap();
    let storage = Arc::new(storage);

    let flush_task = {
        let storage = storage.clone();
        tokio::spawn(async move { storage.start().await.unwrap() })
    };

    for i in 0..3 {
        storage.save(&ban(&format!("user{i}"))).await;
    }
    sleep(Duration::from_millis(10)).await;

    assert_eq!(driver.batch_sizes(), vec![3]);

    storage.stop();
    flush_task.await.unwrap();
    // Nothing was left over for the final flush.
    assert_eq!(driver.batch_sizes(), vec![3]);
    assert!(*driver.closed.lock().unwrap());
}

#[tokio::test(start_paused = true)]
async fn partial_buffer_flushes_on_the_interval_tick() {
    let driver = MockDriver::default();
    let mut storage = Storage::new(driver.clone(), 10, Duration::from_millis(100));
    storage.optimize_channels().await.unwrap();
    let storage = Arc::new(storage);

    let flush_task = {
        let storage = storage.clone();
        tokio::spawn(async move { storage.start().await.unwrap() })
    };

    storage.save(&ban("a")).await;
    storage.save(&ban("b")).await;
    sleep(Duration::from_millis(250)).await;

    // One interval flush of both records; empty ticks flush nothing.
    assert_eq!(driver.batch_sizes(), vec![2]);

    storage.stop();
    flush_task.await.unwrap();
    assert_eq!(driver.batch_sizes(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn save_blocks_while_the_inbox_is_full() {
    let driver = MockDriver::default();
    let mut storage = Storage::new(driver.clone(), 1, Duration::from_secs(3600));
    storage.optimize_channels().await.unwrap();
    let storage = Arc::new(storage);

    // Flush loop not running: the single inbox slot fills and stays full.
    storage.save(&ban("a")).await;

    let blocked = {
        let storage = storage.clone();
        async move { storage.save(&ban("b")).await }
    };
    assert!(
        timeout(Duration::from_millis(50), blocked).await.is_err(),
        "save should block while the inbox is full"
    );

    // Once the loop runs, the backlog drains and saves stop blocking.
    let flush_task = {
        let storage = storage.clone();
        tokio::spawn(async move { storage.start().await.unwrap() })
    };
    timeout(Duration::from_millis(50), storage.save(&ban("c")))
        .await
        .expect("save should unblock once the flush loop runs");

    storage.stop();
    flush_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_drains_the_inbox_into_a_final_flush() {
    let driver = MockDriver::default();
    let mut storage = Storage::new(driver.clone(), 10, Duration::from_secs(3600));
    storage.optimize_channels().await.unwrap();
    let storage = Arc::new(storage);

    // Stop before the loop ever runs: both records are still in the inbox
    // and must come out in the final flush.
    storage.save(&ban("a")).await;
    storage.save(&ban("b")).await;
    storage.stop();

    let flush_task = {
        let storage = storage.clone();
        tokio::spawn(async move { storage.start().await.unwrap() })
    };
    flush_task.await.unwrap();

    assert_eq!(driver.batch_sizes(), vec![2]);
    assert!(*driver.closed.lock().unwrap());
}

#[tokio::test]
async fn start_requires_cached_channels() {
    let storage = Storage::new(MockDriver::default(), 10, Duration::from_secs(5));
    let err = storage.start().await.unwrap_err();
    assert!(matches!(err, Error::UncachedChannels));
}

#[tokio::test(start_paused = true)]
async fn flush_failure_is_returned_and_the_batch_is_lost() {
    struct FailingDriver;

    #[async_trait]
    impl Driver for FailingDriver {
        async fn insert_batch(&self, _records: &[PersistRecord]) -> Result<(), Error> {
            Err(Error::Storage("connection reset".to_string()))
        }
        async fn channels(&self) -> Result<Vec<Broadcaster>, Error> {
            Ok(vec![Broadcaster {
                id: 1,
                name: "somechannel".to_string(),
                lang: "en".to_string(),
            }])
        }
        async fn close(&self) {}
    }

    let mut storage = Storage::new(FailingDriver, 1, Duration::from_secs(3600));
    storage.optimize_channels().await.unwrap();
    let storage = Arc::new(storage);

    let flush_task = {
        let storage = storage.clone();
        tokio::spawn(async move { storage.start().await })
    };
    storage.save(&ban("a")).await;

    let err = flush_task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
}
