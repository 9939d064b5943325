//! Twitch IRC source adapter.
//!
//! Connects to chat with the configured credentials, joins every tracked
//! channel and translates protocol frames into tracker events: PRIVMSG into
//! chat events, CLEARCHAT into bans or timeouts, CLEARMSG into deletions.
//! Events are routed into the per-channel inbox looked up in a registry that
//! is read-only after startup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use twitch_irc::login::StaticLoginCredentials;
use twitch_irc::message::{ClearChatAction, PrivmsgMessage, ServerMessage};
use twitch_irc::{ClientConfig, SecureTCPTransport, TwitchIRCClient};

use crate::error::Error;
use crate::models::{ChatMessage, ModerationEvent, ModerationKind, Subscribed, TrackerEvent};
use crate::wrap_err;

type IrcClient = TwitchIRCClient<SecureTCPTransport, StaticLoginCredentials>;

/// One inbox per tracked channel. Populated once at startup, read-only after.
pub type ChannelRegistry = Arc<HashMap<String, mpsc::Sender<TrackerEvent>>>;

pub struct IrcSource {
    client: IrcClient,
    read_task: JoinHandle<()>,
    /// Set before we drop the client, so the read task can tell our own
    /// disconnect from the connection dying on us.
    closing: Arc<AtomicBool>,
}

impl IrcSource {
    /// Spawn the read loop, join `channels` and return once every join has
    /// been issued.
    pub fn connect(
        username: &str,
        token: &str,
        channels: &[String],
        registry: ChannelRegistry,
    ) -> Result<Self, Error> {
        // Tokens are often stored as "oauth:XXXX"; the library wants the bare
        // token.
        let token = token.strip_prefix("oauth:").unwrap_or(token);
        let config = ClientConfig::new_simple(StaticLoginCredentials::new(
            username.to_string(),
            Some(token.to_string()),
        ));
        let (mut incoming, client) =
            TwitchIRCClient::<SecureTCPTransport, StaticLoginCredentials>::new(config);

        let closing = Arc::new(AtomicBool::new(false));
        let read_task = tokio::spawn({
            let closing = closing.clone();
            async move {
                while let Some(message) = incoming.recv().await {
                    dispatch(&registry, message).await;
                }
                // The stream ending after we dropped the client is the
                // library's "closed by us" signal, not an error.
                if closing.load(Ordering::SeqCst) {
                    info!("IRC read task ended");
                    return;
                }
                // Any other reason the library gives up the connection (bad
                // token, unrecoverable transport failure) leaves nothing to
                // track; there is no feed to come back to.
                error!(
                    "{}",
                    wrap_err!(Error::Platform("IRC stream closed unexpectedly".to_string()))
                );
                std::process::exit(1);
            }
        });

        for channel in channels {
            client
                .join(channel.clone())
                .map_err(|e| Error::Platform(format!("join {channel}: {e}")))?;
        }
        info!("joined {} channels", channels.len());

        Ok(Self {
            client,
            read_task,
            closing,
        })
    }

    /// Tear down the connection and wait for the read loop to wind down.
    pub async fn disconnect(self) {
        self.closing.store(true, Ordering::SeqCst);
        drop(self.client);
        let _ = self.read_task.await;
    }
}

async fn dispatch(registry: &HashMap<String, mpsc::Sender<TrackerEvent>>, message: ServerMessage) {
    match message {
        ServerMessage::Privmsg(msg) => {
            let event = TrackerEvent::Chat(ChatMessage {
                id: msg.message_id.clone(),
                username: msg.sender.login.clone(),
                body: msg.message_text.clone(),
                at: msg.server_timestamp,
                stored: false,
                subscribed: subscribed_status(&msg),
            });
            send_to(registry, &msg.channel_login, event).await;
        }
        ServerMessage::ClearChat(msg) => {
            let (kind, username, duration) = match msg.action {
                ClearChatAction::UserBanned { user_login, .. } => {
                    (ModerationKind::Ban, user_login, 0)
                }
                ClearChatAction::UserTimedOut {
                    user_login,
                    timeout_length,
                    ..
                } => (
                    ModerationKind::Timeout,
                    user_login,
                    timeout_length.as_secs() as i64,
                ),
                // A channel-wide clear names no target; nothing to correlate.
                ClearChatAction::ChatCleared => return,
                _ => return,
            };
            info!(
                "CLEARCHAT channel:{} duration:{} user:{}",
                msg.channel_login, duration, username
            );
            let event = TrackerEvent::Moderation(ModerationEvent {
                kind,
                channel: msg.channel_login.clone(),
                username,
                duration,
                target_msg_id: None,
                at: msg.server_timestamp,
                attached: Vec::new(),
            });
            send_to(registry, &msg.channel_login, event).await;
        }
        ServerMessage::ClearMsg(msg) => {
            info!(
                "CLEARMSG channel:{} user:{}",
                msg.channel_login, msg.sender_login
            );
            let event = TrackerEvent::Moderation(ModerationEvent {
                kind: ModerationKind::Deletion,
                channel: msg.channel_login.clone(),
                username: msg.sender_login.clone(),
                duration: 0,
                target_msg_id: Some(msg.message_id.clone()),
                // CLEARMSG carries no server time for the deletion itself.
                at: Utc::now(),
                attached: Vec::new(),
            });
            send_to(registry, &msg.channel_login, event).await;
        }
        _ => {}
    }
}

/// The library parses badge tags before we see the message, so subscription
/// state comes from the `subscriber` (or `founder`) badge rather than the
/// raw tag.
fn subscribed_status(msg: &PrivmsgMessage) -> Subscribed {
    if msg
        .badges
        .iter()
        .any(|b| b.name == "subscriber" || b.name == "founder")
    {
        Subscribed::Yes
    } else {
        Subscribed::No
    }
}

async fn send_to(
    registry: &HashMap<String, mpsc::Sender<TrackerEvent>>,
    channel: &str,
    event: TrackerEvent,
) {
    match registry.get(channel) {
        Some(tx) => {
            if tx.send(event).await.is_err() {
                debug!("inbox for {channel} closed, event dropped");
            }
        }
        None => warn!("event for untracked channel {channel}"),
    }
}
