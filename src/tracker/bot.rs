// src/tracker/bot.rs
//! Lifecycle orchestration: wires the database, the storage flush loop, the
//! channel workers and the IRC source together, in that order, and unwinds
//! them in reverse on shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::db::Database;
use crate::error::Error;
use crate::heuristics::Analyzer;
use crate::models::TrackerEvent;
use crate::platforms::twitch_irc::IrcSource;
use crate::storage::postgres::PostgresDriver;
use crate::storage::{Storage, FLUSH_INTERVAL, OP_QUEUE_SIZE};
use crate::tracker;
use crate::wrap_err;

pub struct Bot {
    storage: Arc<Storage<PostgresDriver>>,
    flush_task: JoinHandle<()>,
    irc: IrcSource,
    inboxes: HashMap<String, mpsc::Sender<TrackerEvent>>,
    done: oneshot::Receiver<()>,
}

impl Bot {
    /// Strict startup sequence: open the sink, discover the channel list,
    /// spawn the workers, then connect IRC. Each step only runs once the
    /// previous one is ready.
    pub async fn start(cfg: &Config) -> Result<Self, Error> {
        info!("initializing storage...");
        let db = Database::connect(cfg).await?;
        if cfg.db_migrate {
            db.migrate(cfg.db_version).await?;
        }
        let mut storage = Storage::new(
            PostgresDriver::new(db.pool().clone()),
            OP_QUEUE_SIZE,
            FLUSH_INTERVAL,
        );
        let channels = storage.optimize_channels().await?;
        info!("tracking {} channels", channels.len());
        let storage = Arc::new(storage);

        let flush_task = {
            let storage = storage.clone();
            tokio::spawn(async move {
                if let Err(err) = storage.start().await {
                    // The pending batch is gone with the error; nothing left
                    // to recover.
                    error!("{}", wrap_err!(err));
                    std::process::exit(1);
                }
            })
        };

        info!("initializing channel tracker...");
        let analyzer = Arc::new(Analyzer::standard());
        let (inboxes, done) = tracker::spawn(&channels, storage.clone(), analyzer);
        info!("tracker ready");

        info!("initializing IRC client...");
        let registry = Arc::new(inboxes.clone());
        let irc = IrcSource::connect(
            &cfg.client_username,
            &cfg.client_token,
            &channels,
            registry,
        )?;
        info!("connected to IRC server");

        Ok(Self {
            storage,
            flush_task,
            irc,
            inboxes,
            done,
        })
    }

    /// Graceful shutdown, the inverse of startup: disconnect IRC, close the
    /// worker inboxes, wait for the workers to drain, then stop storage
    /// (which performs the final flush and closes the database).
    pub async fn stop(self) {
        info!("stopping IRC client");
        self.irc.disconnect().await;
        info!("IRC client stopped");

        info!("stopping tracker");
        drop(self.inboxes);
        let _ = self.done.await;
        info!("tracker stopped");

        info!("stopping storage");
        self.storage.stop();
        let _ = self.flush_task.await;
        info!("storage stopped");
    }
}
