use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use tracing::{error, info, warn};

use super::BotCore;
use super::outcome::{BatchOutcome, ItemStatus, SkipReason};
use crate::utils::formatting::{apply_pattern_string, date_label};

impl BotCore {
    pub async fn post_all(&self) -> BatchOutcome {
        self.post_all_at(self.now()).await
    }

    /// Posts tomorrow's announcement into every target, one channel at a time.
    pub async fn post_all_at(&self, now: DateTime<Tz>) -> BatchOutcome {
        let text = self.announcement_text(&now);
        let mut outcome = BatchOutcome::default();
        let mut seen = HashSet::new();

        for channel_id in &self.config.channels.targets {
            if !seen.insert(channel_id.as_str()) {
                warn!("channel {} is configured twice, skipping repeat", channel_id);
                outcome.push(channel_id, ItemStatus::Skipped(SkipReason::Duplicate));
                continue;
            }

            let status = self.post_to_channel(channel_id, &text).await;
            outcome.push(channel_id, status);
        }

        info!("announcement round finished: {}", outcome);
        outcome
    }

    pub fn announcement_text(&self, now: &DateTime<Tz>) -> String {
        let tomorrow = date_label(now, 1);
        let announcement = &self.config.announcement;
        apply_pattern_string(
            &announcement.template,
            &[("date", &tomorrow), ("mention", &announcement.mention)],
        )
    }

    async fn post_to_channel(&self, channel_id: &str, text: &str) -> ItemStatus {
        let channel = match self.chat.resolve_channel(channel_id).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                warn!("channel {} is not reachable, skipping", channel_id);
                self.notifier
                    .alert(&format!("Channel {channel_id} nicht erreichbar"))
                    .await;
                return ItemStatus::Skipped(SkipReason::ChannelUnavailable);
            }
            Err(err) => {
                warn!("failed to resolve channel {}: {:#}", channel_id, err);
                self.notifier
                    .alert(&format!("Channel {channel_id} nicht erreichbar: {err:#}"))
                    .await;
                return ItemStatus::Skipped(SkipReason::ChannelUnavailable);
            }
        };

        let message_id = match self.send_announcement(channel_id, text).await {
            Ok(message_id) => message_id,
            Err(err) => {
                error!("failed to post announcement in {}: {:#}", channel_id, err);
                self.notifier
                    .alert(&format!("Fehler beim Senden in {channel_id}: {err:#}"))
                    .await;
                return ItemStatus::Failed(format!("{err:#}"));
            }
        };

        let persisted = match self.store.record(channel_id, &message_id).await {
            Ok(()) => true,
            Err(err) => {
                error!("failed to persist announcement for {}: {}", channel_id, err);
                self.notifier
                    .alert(&format!("Speichern fehlgeschlagen für {channel_id}: {err}"))
                    .await;
                false
            }
        };

        info!(
            "announcement sent to #{} ({}) as {}",
            channel.name.as_deref().unwrap_or("unnamed"),
            channel.id,
            message_id
        );
        ItemStatus::Posted {
            message_id,
            persisted,
        }
    }

    async fn send_announcement(&self, channel_id: &str, text: &str) -> Result<String> {
        let message_id = self
            .chat
            .send_message(channel_id, text)
            .await
            .context("sending announcement failed")?;

        let announcement = &self.config.announcement;
        for emoji in [&announcement.accept_emoji, &announcement.decline_emoji] {
            self.chat
                .add_reaction(channel_id, &message_id, emoji)
                .await
                .with_context(|| format!("adding reaction {emoji} failed"))?;
        }

        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::bot::testing::{ALERT_CHANNEL, LOG_CHANNEL, evening, test_bot, test_bot_with_store};
    use crate::bot::{ItemStatus, SkipReason, TallyOutcome};
    use crate::chat::mock::{Call, MockChat, user};
    use crate::store::{AnnouncementStore, StoreBackend};

    #[test]
    fn announcement_names_tomorrow_and_mention() {
        let chat = MockChat::new();
        let bot = test_bot(&chat, &["100"]);

        let text = bot.announcement_text(&evening());

        assert_eq!(
            text,
            "**Aufstellung am 05.06. um 20 Uhr**\n\nReagiere bis **19 Uhr**. Wer nicht reagiert = Sanki <@BBG>"
        );
    }

    #[tokio::test]
    async fn posts_with_both_reactions_in_order_and_records() {
        let chat = MockChat::new();
        let bot = test_bot(&chat, &["100"]);

        let outcome = bot.post_all_at(evening()).await;

        let Some(ItemStatus::Posted { message_id, persisted }) = outcome.status_of("100") else {
            panic!("expected posted status, got {:?}", outcome.status_of("100"));
        };
        assert!(*persisted);
        assert_eq!(bot.store().lookup("100").as_deref(), Some(message_id.as_str()));

        let reactions: Vec<_> = chat
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::React { emoji, .. } => Some(emoji),
                _ => None,
            })
            .collect();
        assert_eq!(reactions, vec!["✅".to_string(), "❌".to_string()]);
    }

    #[tokio::test]
    async fn every_channel_is_attempted_despite_send_failures() {
        let chat = MockChat::new();
        chat.failing_send("100");
        chat.failing_send("300");
        let bot = test_bot(&chat, &["100", "200", "300", "400"]);

        let outcome = bot.post_all_at(evening()).await;

        assert_eq!(chat.send_attempts() - chat.sent_to(ALERT_CHANNEL).len(), 4);
        assert_eq!(outcome.results.len(), 4);
        assert_eq!(outcome.failed(), 2);
        assert_eq!(outcome.succeeded(), 2);
        assert!(bot.store().lookup("100").is_none());
        assert!(bot.store().lookup("200").is_some());
        assert!(bot.store().lookup("400").is_some());
    }

    #[tokio::test]
    async fn unresolved_channel_is_skipped_and_reported() {
        let chat = MockChat::new();
        chat.missing_channel("200");
        let bot = test_bot(&chat, &["100", "200"]);

        let outcome = bot.post_all_at(evening()).await;

        assert!(matches!(
            outcome.status_of("100"),
            Some(ItemStatus::Posted { .. })
        ));
        assert_eq!(
            outcome.status_of("200"),
            Some(&ItemStatus::Skipped(SkipReason::ChannelUnavailable))
        );
        assert!(chat.sent_to("200").is_empty());
        assert!(bot.store().lookup("200").is_none());

        let alerts = chat.sent_to(ALERT_CHANNEL);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("200"));
    }

    #[tokio::test]
    async fn reaction_failure_leaves_no_record() {
        let chat = MockChat::new();
        chat.failing_reactions();
        let bot = test_bot(&chat, &["100"]);

        let outcome = bot.post_all_at(evening()).await;

        let Some(ItemStatus::Failed(reason)) = outcome.status_of("100") else {
            panic!("expected failure");
        };
        assert!(reason.contains("✅"));
        assert!(bot.store().lookup("100").is_none());
    }

    #[tokio::test]
    async fn duplicate_targets_are_posted_once() {
        let chat = MockChat::new();
        let bot = test_bot(&chat, &["100", "100"]);

        let outcome = bot.post_all_at(evening()).await;

        assert_eq!(chat.sent_to("100").len(), 1);
        assert_eq!(
            outcome.results[1].status,
            ItemStatus::Skipped(SkipReason::Duplicate)
        );
    }

    #[tokio::test]
    async fn store_write_failure_keeps_post_and_alerts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone").join("records.json");
        let store = Arc::new(AnnouncementStore::load(StoreBackend::File(path)).await);
        let chat = MockChat::new();
        let bot = test_bot_with_store(&chat, &["100"], store);

        let outcome = bot.post_all_at(evening()).await;

        assert!(matches!(
            outcome.status_of("100"),
            Some(ItemStatus::Posted {
                persisted: false,
                ..
            })
        ));
        assert!(bot.store().lookup("100").is_some());
        assert_eq!(chat.sent_to(ALERT_CHANNEL).len(), 1);
    }

    #[tokio::test]
    async fn unreachable_channel_has_nothing_to_tally_after_posting() {
        let chat = MockChat::new();
        chat.missing_channel("200");
        let bot = test_bot(&chat, &["100", "200"]);

        let posted = bot.post_all_at(evening()).await;

        let alerts = chat.sent_to(ALERT_CHANNEL);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("200"));
        assert!(bot.store().lookup("200").is_none());
        let Some(ItemStatus::Posted { message_id, .. }) = posted.status_of("100") else {
            panic!("expected posted status, got {:?}", posted.status_of("100"));
        };
        chat.react_as(message_id, "✅", user("anna"));
        chat.react_as(message_id, "❌", user("ben"));

        let TallyOutcome::Completed(tallied) = bot.tally_at(evening()).await else {
            panic!("tally aborted");
        };

        assert_eq!(tallied.status_of("100"), Some(&ItemStatus::Summarized));
        assert_eq!(
            tallied.status_of("200"),
            Some(&ItemStatus::Skipped(SkipReason::NoRecord))
        );
        assert_eq!(
            chat.sent_to(LOG_CHANNEL),
            vec!["📋 **Aufstellung 04.06.** (<#100>):\n✅ anna\n❌ ben".to_string()]
        );
        assert_eq!(chat.sent_to(ALERT_CHANNEL).len(), 1);
    }

    #[tokio::test]
    async fn repost_overwrites_previous_record() {
        let chat = MockChat::new();
        let bot = test_bot(&chat, &["100"]);

        bot.post_all_at(evening()).await;
        let first = bot.store().lookup("100").expect("first record");
        bot.post_all_at(evening()).await;
        let second = bot.store().lookup("100").expect("second record");

        assert_ne!(first, second);
    }
}
