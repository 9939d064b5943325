//! Per-channel correlation between chat history and moderation events.
//!
//! One worker task per tracked channel, each owning a private ring history of
//! recent messages. Chat events extend the history; moderation events are
//! joined against it, gated through the heuristics analyzer and handed to
//! storage. Within a channel, events are processed strictly in arrival
//! order, so an action always sees the messages that preceded it.

pub mod bot;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::heuristics::{Analyzer, Traits};
use crate::history::RingHistory;
use crate::models::{ChatMessage, ModerationEvent, ModerationKind, TrackerEvent};
use crate::storage::{Driver, Storage};

/// Number of messages kept in the in-memory history of each channel. Should
/// cover at least the scrollback a moderator can still act on.
pub const MAX_HISTORY: usize = 150;
/// Per-channel inbox depth.
const INBOX_SIZE: usize = 100;

/// Spawn one worker per channel. Returns the name→inbox map (all inboxes
/// exist by the time this returns) and a receiver that resolves once every
/// worker has exited.
///
/// Workers stop when their inbox closes; drop all senders to stop them.
pub fn spawn<D: Driver>(
    channels: &[String],
    storage: Arc<Storage<D>>,
    analyzer: Arc<Analyzer>,
) -> (HashMap<String, mpsc::Sender<TrackerEvent>>, oneshot::Receiver<()>) {
    let mut inboxes = HashMap::with_capacity(channels.len());
    let mut handles = Vec::with_capacity(channels.len());

    for channel in channels {
        let (tx, rx) = mpsc::channel(INBOX_SIZE);
        inboxes.insert(channel.clone(), tx);
        handles.push(tokio::spawn(channel_worker(
            channel.clone(),
            rx,
            storage.clone(),
            analyzer.clone(),
        )));
    }

    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        for handle in handles {
            let _ = handle.await;
        }
        let _ = done_tx.send(());
    });

    (inboxes, done_rx)
}

async fn channel_worker<D: Driver>(
    channel: String,
    mut rx: mpsc::Receiver<TrackerEvent>,
    storage: Arc<Storage<D>>,
    analyzer: Arc<Analyzer>,
) {
    // History is scoped to this task; nothing else ever touches it.
    let mut history = RingHistory::new(MAX_HISTORY, ChatMessage::noop());
    debug!("worker for #{channel} started");

    while let Some(event) = rx.recv().await {
        match event {
            TrackerEvent::Chat(msg) => {
                history.append(msg);
            }
            TrackerEvent::Moderation(mut event) => match event.kind {
                ModerationKind::Ban | ModerationKind::Timeout => {
                    // Pull the target's unclaimed messages, marking them in
                    // the same pass so a follow-up action cannot store them
                    // again. A ban with no matches is still worth storing.
                    event.attached = history.filter(|m| {
                        if m.username == event.username && !m.stored {
                            m.stored = true;
                            return true;
                        }
                        false
                    });
                    if compliant(&analyzer, &event) {
                        storage.save(&event).await;
                    }
                }
                ModerationKind::Deletion => {
                    let Some(target) = event.target_msg_id.clone() else {
                        continue;
                    };
                    let found = history.find(|m| {
                        if m.id == target && !m.stored {
                            m.stored = true;
                            return true;
                        }
                        false
                    });
                    // Unmatched (or already claimed) deletions drop silently.
                    if let Some(privmsg) = found {
                        event.attached = vec![privmsg];
                        if compliant(&analyzer, &event) {
                            storage.save(&event).await;
                        }
                    }
                }
            },
        }
    }
    debug!("worker for #{channel} exited");
}

/// Run the analyzer over every attached message, reusing one traits value;
/// only the first message carries the most-recent flag. A single
/// non-compliant message in the batch implies the bot-like pattern the rules
/// guard against, so it drops the whole event.
fn compliant(analyzer: &Analyzer, event: &ModerationEvent) -> bool {
    let mut traits = Traits {
        kind: event.kind,
        body: String::new(),
        at: event.at,
        moderated_at: event.at,
        timeout_duration: event.duration,
        is_most_recent_msg: true,
    };
    for msg in &event.attached {
        traits.body.clone_from(&msg.body);
        traits.at = msg.at;
        if !analyzer.is_compliant(&traits) {
            return false;
        }
        traits.is_most_recent_msg = false;
    }
    true
}
