//! Batching storage layer.
//!
//! Records from every channel worker funnel into one bounded op inbox and are
//! written as bulk transactions, either when the pending buffer fills or on a
//! wall-clock interval, whichever comes first. The inbox is the only
//! synchronization between workers and the flush loop; when the batcher falls
//! behind, `save` blocks the calling worker (backpressure) rather than
//! dropping records.

pub mod postgres;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use crate::error::Error;
use crate::models::{Broadcaster, ChatMessage, ModerationEvent, PersistRecord, Subscribed};

/// Capacity of the op inbox and of the pending buffer.
pub const OP_QUEUE_SIZE: usize = 200;
/// Wall-clock flush cadence.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

const SEP: char = '|';

/// Write sink contract. Batch inserts are transactional: either every record
/// in the slice lands or the call errors.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    async fn insert_batch(&self, records: &[PersistRecord]) -> Result<(), Error>;

    /// The tracked channel set, seeded in the backend.
    async fn channels(&self) -> Result<Vec<Broadcaster>, Error>;

    async fn close(&self);
}

/// Batching sink in front of a [`Driver`].
///
/// `save` may be called from any number of tasks; `start` runs on exactly
/// one. `stop` cancels the flush loop, which then drains the inbox, performs
/// a final flush and closes the driver before its task finishes.
pub struct Storage<D: Driver> {
    driver: D,
    tx: mpsc::Sender<PersistRecord>,
    rx: Mutex<Option<mpsc::Receiver<PersistRecord>>>,
    shutdown_tx: watch::Sender<bool>,
    capacity: usize,
    flush_interval: Duration,
    /// Channel-name to internal-id cache, populated once by
    /// `optimize_channels` and read-only afterwards.
    chan_ids: Option<HashMap<String, i32>>,
}

impl<D: Driver> Storage<D> {
    pub fn new(driver: D, capacity: usize, flush_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            driver,
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown_tx,
            capacity,
            flush_interval,
            chan_ids: None,
        }
    }

    /// Query the backend for the tracked channels and cache the name→id
    /// mapping so inserts never have to look it up again. Must be called
    /// before [`start`](Storage::start).
    pub async fn optimize_channels(&mut self) -> Result<Vec<String>, Error> {
        let broadcasters = self.driver.channels().await?;
        self.chan_ids = Some(
            broadcasters
                .iter()
                .map(|b| (b.name.clone(), b.id))
                .collect(),
        );
        Ok(broadcasters.into_iter().map(|b| b.name).collect())
    }

    /// Encode `event` into a persist record and enqueue it. Blocks while the
    /// op inbox is full; this is the only intentional blocking point for
    /// channel workers.
    pub async fn save(&self, event: &ModerationEvent) {
        if let Some(privmsg) = event.attached.first() {
            debug!(
                "{}: {}; T-{:.3}s [S]",
                event.username,
                privmsg.body,
                (event.at - privmsg.at).num_milliseconds() as f64 / 1000.0,
            );
        }

        let channel_id = self
            .chan_ids
            .as_ref()
            .and_then(|ids| ids.get(&event.channel))
            .copied()
            .unwrap_or_default();

        let record = PersistRecord {
            kind: event.kind,
            username: event.username.clone(),
            channel: event.channel.clone(),
            channel_id,
            duration: event.duration,
            at: event.at,
            messages: encode_messages(&event.attached),
            subscribed: event
                .attached
                .first()
                .map(|m| m.subscribed)
                .unwrap_or(Subscribed::Unknown),
        };

        if self.tx.send(record).await.is_err() {
            // Only possible once the flush loop has died; the process is
            // already on its way down.
            error!("op inbox closed, record for {} lost", event.username);
        }
    }

    /// The flush loop. Fails fast with [`Error::UncachedChannels`] when
    /// [`optimize_channels`](Storage::optimize_channels) has not run.
    ///
    /// Any flush error is returned to the caller; the pending batch is lost
    /// with it.
    pub async fn start(&self) -> Result<(), Error> {
        if self.chan_ids.is_none() {
            return Err(Error::UncachedChannels);
        }
        let mut rx = self
            .rx
            .lock()
            .expect("op inbox mutex poisoned")
            .take()
            .ok_or_else(|| Error::Storage("flush loop already started".to_string()))?;

        let mut buffer: Vec<PersistRecord> = Vec::with_capacity(self.capacity);
        let mut tick = interval(self.flush_interval);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            "storage flush loop started capacity={} interval={:?}",
            self.capacity, self.flush_interval
        );

        loop {
            // A cancel that landed before this loop was entered has already
            // been marked seen by subscribe(); catch it here.
            if *self.shutdown_tx.borrow() {
                break;
            }
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(record) => {
                        buffer.push(record);
                        if buffer.len() >= self.capacity {
                            self.flush(&mut buffer).await?;
                        }
                    }
                    None => break,
                },
                _ = tick.tick() => {
                    self.flush(&mut buffer).await?;
                }
                Ok(_) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        // Drain whatever the workers managed to enqueue before the inboxes
        // closed, then flush the tail.
        while let Ok(record) = rx.try_recv() {
            buffer.push(record);
        }
        if !buffer.is_empty() {
            info!("final flush: {} records remain", buffer.len());
        }
        self.flush(&mut buffer).await?;

        self.driver.close().await;
        info!("storage flush loop exited");
        Ok(())
    }

    /// Cancel the flush loop. The final flush and driver close happen on the
    /// loop's task; await its handle to observe them.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn flush(&self, buffer: &mut Vec<PersistRecord>) -> Result<(), Error> {
        if buffer.is_empty() {
            return Ok(());
        }
        debug!("flushing {} moderation records", buffer.len());
        self.driver.insert_batch(buffer).await?;
        buffer.clear();
        Ok(())
    }
}

/// Join attached message bodies into the single `messages` column value:
/// bodies separated by `|`, literal pipes escaped as `\|`.
fn encode_messages(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for (i, msg) in messages.iter().enumerate() {
        if i > 0 {
            out.push(SEP);
        }
        out.push_str(&msg.body.replace(SEP, "\\|"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(body: &str) -> ChatMessage {
        ChatMessage {
            body: body.to_string(),
            ..ChatMessage::noop()
        }
    }

    /// Inverse of `encode_messages`: split on unescaped pipes, unescape.
    fn decode_messages(encoded: &str) -> Vec<String> {
        if encoded.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut cur = String::new();
        let mut chars = encoded.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&'|') => {
                    chars.next();
                    cur.push('|');
                }
                '|' => out.push(std::mem::take(&mut cur)),
                other => cur.push(other),
            }
        }
        out.push(cur);
        out
    }

    #[test]
    fn encode_joins_most_recent_first_bodies() {
        let encoded = encode_messages(&[msg("again"), msg("hi")]);
        assert_eq!(encoded, "again|hi");
    }

    #[test]
    fn encode_escapes_literal_pipes() {
        let encoded = encode_messages(&[msg("a|b"), msg("c")]);
        assert_eq!(encoded, "a\\|b|c");
    }

    #[test]
    fn encoding_round_trips() {
        let bodies = ["plain", "with|pipe", "", "trailing|", "|leading", "two||pipes"];
        let msgs: Vec<ChatMessage> = bodies.iter().map(|b| msg(b)).collect();
        let decoded = decode_messages(&encode_messages(&msgs));
        assert_eq!(decoded, bodies.iter().map(|b| b.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn empty_batch_encodes_empty() {
        assert_eq!(encode_messages(&[]), "");
        assert!(decode_messages("").is_empty());
    }
}
