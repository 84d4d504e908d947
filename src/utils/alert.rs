use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::chat::ChatService;
use crate::config::ChannelsConfig;

pub const STARTUP_NOTICE: &str = "🟢 **Bot wurde gestartet**";
pub const SHUTDOWN_NOTICE: &str = "🔴 Bot wird beendet...";

/// Best-effort delivery of failure and lifecycle notices.
pub struct Notifier {
    chat: Arc<dyn ChatService>,
    alert_channel: Option<String>,
    startup_channel: Option<String>,
}

impl Notifier {
    pub fn new(
        chat: Arc<dyn ChatService>,
        alert_channel: Option<String>,
        startup_channel: Option<String>,
    ) -> Self {
        Self {
            chat,
            alert_channel,
            startup_channel,
        }
    }

    pub fn from_channels(chat: Arc<dyn ChatService>, channels: &ChannelsConfig) -> Self {
        Self::new(
            chat,
            channels.alert_channel.clone(),
            channels.startup_channel.clone(),
        )
    }

    /// Never fails; delivery problems are only logged.
    pub async fn alert(&self, message: &str) {
        let content = format_alert(message);
        if let Err(err) = self.post(self.alert_channel.as_deref(), &content).await {
            warn!("failed to deliver alert notice: {}", err);
        }
    }

    pub async fn startup(&self) {
        if let Err(err) = self
            .post(self.startup_channel.as_deref(), STARTUP_NOTICE)
            .await
        {
            warn!("failed to deliver startup notice: {}", err);
        }
    }

    pub async fn shutdown(&self) {
        if let Err(err) = self
            .post(self.startup_channel.as_deref(), SHUTDOWN_NOTICE)
            .await
        {
            warn!("failed to deliver shutdown notice: {}", err);
        }
    }

    async fn post(&self, channel_id: Option<&str>, content: &str) -> Result<()> {
        let Some(channel_id) = channel_id else {
            debug!("no notice channel configured, dropping notice");
            return Ok(());
        };

        if self.chat.resolve_channel(channel_id).await?.is_none() {
            warn!("notice channel {} is not reachable", channel_id);
            return Ok(());
        }

        self.chat.send_message(channel_id, content).await?;
        info!("notice sent to {}", channel_id);
        Ok(())
    }
}

pub fn format_alert(message: &str) -> String {
    format!("🚨 Fehler:\n```{}```", message.replace("```", "'''"))
}
