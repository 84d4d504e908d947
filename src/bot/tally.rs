use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use tracing::{debug, error, info, warn};

use super::BotCore;
use super::outcome::{BatchOutcome, ItemStatus, SkipReason, TallyOutcome};
use crate::chat::ChatMessage;
use crate::utils::formatting::{date_label, join_names};

/// Display names of the non-bot members who reacted on each side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionTally {
    pub accepted: Vec<String>,
    pub declined: Vec<String>,
}

impl BotCore {
    pub async fn tally(&self) -> TallyOutcome {
        self.tally_at(self.now()).await
    }

    pub async fn tally_at(&self, now: DateTime<Tz>) -> TallyOutcome {
        let log_channel = self.config.channels.log_channel.as_str();
        let unavailable = match self.chat.resolve_channel(log_channel).await {
            Ok(Some(_)) => None,
            Ok(None) => Some(format!("Log-Channel {log_channel} nicht erreichbar")),
            Err(err) => Some(format!("Log-Channel {log_channel} nicht erreichbar: {err:#}")),
        };
        if let Some(reason) = unavailable {
            error!("tally aborted: {}", reason);
            self.notifier.alert(&reason).await;
            return TallyOutcome::Aborted(reason);
        }

        let today = date_label(&now, 0);
        let mut outcome = BatchOutcome::default();
        let mut seen = HashSet::new();

        for channel_id in &self.config.channels.targets {
            if !seen.insert(channel_id.as_str()) {
                outcome.push(channel_id, ItemStatus::Skipped(SkipReason::Duplicate));
                continue;
            }

            let Some(message_id) = self.store.lookup(channel_id) else {
                debug!("no announcement recorded for {}, nothing to tally", channel_id);
                outcome.push(channel_id, ItemStatus::Skipped(SkipReason::NoRecord));
                continue;
            };

            let status = self
                .tally_channel(log_channel, channel_id, &message_id, &today)
                .await;
            outcome.push(channel_id, status);
        }

        info!("tally round finished: {}", outcome);
        TallyOutcome::Completed(outcome)
    }

    async fn tally_channel(
        &self,
        log_channel: &str,
        channel_id: &str,
        message_id: &str,
        today: &str,
    ) -> ItemStatus {
        let tally = match self.collect_tally(channel_id, message_id).await {
            Ok(tally) => tally,
            Err(err) => {
                error!("failed to tally {}: {:#}", channel_id, err);
                self.notifier
                    .alert(&format!("Fehler bei Auswertung in {channel_id}: {err:#}"))
                    .await;
                return ItemStatus::Failed(format!("{err:#}"));
            }
        };

        let summary = self.render_summary(channel_id, today, &tally);
        match self.chat.send_message(log_channel, &summary).await {
            Ok(_) => {
                info!(
                    "summary for {} sent ({} accepted, {} declined)",
                    channel_id,
                    tally.accepted.len(),
                    tally.declined.len()
                );
                ItemStatus::Summarized
            }
            Err(err) => {
                error!("failed to send summary for {}: {:#}", channel_id, err);
                self.notifier
                    .alert(&format!("Fehler bei Auswertung in {channel_id}: {err:#}"))
                    .await;
                ItemStatus::Failed(format!("{err:#}"))
            }
        }
    }

    pub async fn collect_tally(&self, channel_id: &str, message_id: &str) -> Result<ReactionTally> {
        let message = self
            .chat
            .fetch_message(channel_id, message_id)
            .await
            .with_context(|| format!("fetching message {message_id} failed"))?;

        let announcement = &self.config.announcement;
        Ok(ReactionTally {
            accepted: self
                .participants(&message, &announcement.accept_emoji)
                .await?,
            declined: self
                .participants(&message, &announcement.decline_emoji)
                .await?,
        })
    }

    async fn participants(&self, message: &ChatMessage, emoji: &str) -> Result<Vec<String>> {
        let Some(count) = message.reaction_count(emoji) else {
            warn!("message {} carries no {} reaction", message.id, emoji);
            return Ok(Vec::new());
        };
        debug!("{} {} reactions on {}", count, emoji, message.id);

        let users = self
            .chat
            .reaction_users(&message.channel_id, &message.id, emoji)
            .await
            .with_context(|| format!("fetching {emoji} reactions failed"))?;

        Ok(users
            .iter()
            .filter(|user| !user.bot)
            .map(|user| user.display_name().to_string())
            .collect())
    }

    pub fn render_summary(&self, channel_id: &str, today: &str, tally: &ReactionTally) -> String {
        let announcement = &self.config.announcement;
        format!(
            "📋 **Aufstellung {today}** (<#{channel_id}>):\n{} {}\n{} {}",
            announcement.accept_emoji,
            join_names(&tally.accepted, &announcement.empty_marker),
            announcement.decline_emoji,
            join_names(&tally.declined, &announcement.empty_marker),
        )
    }
}
