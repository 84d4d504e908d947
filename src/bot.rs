use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::chat::ChatService;
use crate::config::Config;
use crate::store::AnnouncementStore;
use crate::utils::Notifier;

pub mod command_handler;
pub mod outcome;
pub mod poster;
pub mod tally;

pub use self::command_handler::{BotCommand, CommandInvocation, CommandOutcome};
pub use self::outcome::{BatchOutcome, ItemStatus, SkipReason, TallyOutcome};

/// Owns everything the scheduled routines and the commands operate on.
pub struct BotCore {
    config: Arc<Config>,
    tz: Tz,
    store: Arc<AnnouncementStore>,
    chat: Arc<dyn ChatService>,
    notifier: Arc<Notifier>,
    ready_announced: AtomicBool,
}

impl BotCore {
    pub fn new(
        config: Arc<Config>,
        store: Arc<AnnouncementStore>,
        chat: Arc<dyn ChatService>,
        notifier: Arc<Notifier>,
    ) -> Result<Self> {
        let tz = config.schedule.tz()?;
        Ok(Self {
            config,
            tz,
            store,
            chat,
            notifier,
            ready_announced: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[cfg(test)]
    pub fn store(&self) -> &AnnouncementStore {
        &self.store
    }

    pub fn notifier(&self) -> Arc<Notifier> {
        self.notifier.clone()
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    /// Called on every gateway READY; only the first one posts the startup notice.
    pub async fn on_ready(&self) {
        if self.ready_announced.swap(true, Ordering::SeqCst) {
            debug!("gateway session resumed after reconnect");
            return;
        }
        info!(
            "bot ready, {} target channels, {} stored announcements",
            self.config.channels.targets.len(),
            self.store.len()
        );
        self.notifier.startup().await;
    }
}
