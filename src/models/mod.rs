// src/models/mod.rs

use chrono::{DateTime, Utc};

/// A single chat utterance as observed on a channel.
///
/// Owned by exactly one channel worker's ring history and destroyed when the
/// ring rotates over it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Platform-assigned unique id.
    pub id: String,
    pub username: String,
    /// Raw message text.
    pub body: String,
    pub at: DateTime<Utc>,
    /// Set once a moderation action has claimed this message, so a later
    /// action against the same user never stores it twice.
    pub stored: bool,
    pub subscribed: Subscribed,
}

impl ChatMessage {
    /// Sentinel used to pre-fill ring slots. Every field is safe to read
    /// from a predicate; the username can never collide with a real login.
    pub fn noop() -> Self {
        Self {
            id: String::new(),
            username: "%noop%".to_string(),
            body: String::new(),
            at: DateTime::UNIX_EPOCH,
            stored: false,
            subscribed: Subscribed::Unknown,
        }
    }
}

/// Subscription state of the author at the time of the message. Unknown when
/// there is no message to read it from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subscribed {
    Yes,
    No,
    #[default]
    Unknown,
}

impl Subscribed {
    /// Tri-state column encoding: unknown maps to NULL.
    pub fn as_db(self) -> Option<bool> {
        match self {
            Subscribed::Yes => Some(true),
            Subscribed::No => Some(false),
            Subscribed::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationKind {
    Ban,
    Timeout,
    Deletion,
}

impl ModerationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationKind::Ban => "ban",
            ModerationKind::Timeout => "timeout",
            ModerationKind::Deletion => "deletion",
        }
    }
}

/// A ban, timeout or message deletion observed on a channel.
#[derive(Debug, Clone)]
pub struct ModerationEvent {
    pub kind: ModerationKind,
    pub channel: String,
    /// Target of the action.
    pub username: String,
    /// Timeout length in seconds; 0 for bans and deletions.
    pub duration: i64,
    /// Deletions carry the id of the removed message.
    pub target_msg_id: Option<String>,
    /// When the moderation happened.
    pub at: DateTime<Utc>,
    /// Related messages pulled from the channel history by the correlator
    /// before the event reaches storage. Most recent first.
    pub attached: Vec<ChatMessage>,
}

/// Event routed into a channel worker's inbox. Chat and moderation frames
/// share one inbox so a worker sees them in arrival order.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Chat(ChatMessage),
    Moderation(ModerationEvent),
}

/// Row of the seeded `broadcaster` table; `id` is the internal channel id
/// cached by the storage layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Broadcaster {
    pub id: i32,
    pub name: String,
    pub lang: String,
}

/// What the sink persists for one moderation event.
#[derive(Debug, Clone)]
pub struct PersistRecord {
    pub kind: ModerationKind,
    pub username: String,
    pub channel: String,
    pub channel_id: i32,
    pub duration: i64,
    pub at: DateTime<Utc>,
    /// Attached message bodies, `|`-joined with literal pipes escaped.
    pub messages: String,
    pub subscribed: Subscribed,
}
