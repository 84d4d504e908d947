use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The channel appears more than once in the configured targets.
    Duplicate,
    ChannelUnavailable,
    NoRecord,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate => f.write_str("duplicate target"),
            Self::ChannelUnavailable => f.write_str("channel unavailable"),
            Self::NoRecord => f.write_str("no recorded announcement"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Posted { message_id: String, persisted: bool },
    Summarized,
    Skipped(SkipReason),
    Failed(String),
}

impl ItemStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Posted { .. } | Self::Summarized)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Posted {
                message_id,
                persisted: true,
            } => write!(f, "posted {message_id}"),
            Self::Posted {
                message_id,
                persisted: false,
            } => write!(f, "posted {message_id} (not persisted)"),
            Self::Summarized => f.write_str("summarized"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelResult {
    pub channel_id: String,
    pub status: ItemStatus,
}

/// One entry per configured channel, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub results: Vec<ChannelResult>,
}

impl BatchOutcome {
    pub fn push(&mut self, channel_id: &str, status: ItemStatus) {
        self.results.push(ChannelResult {
            channel_id: channel_id.to_string(),
            status,
        });
    }

    #[cfg(test)]
    pub fn status_of(&self, channel_id: &str) -> Option<&ItemStatus> {
        self.results
            .iter()
            .find(|result| result.channel_id == channel_id)
            .map(|result| &result.status)
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, ItemStatus::Skipped(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, ItemStatus::Failed(_)))
            .count()
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ok, {} skipped, {} failed",
            self.succeeded(),
            self.skipped(),
            self.failed()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyOutcome {
    /// Nothing was tallied because the summaries had nowhere to go.
    Aborted(String),
    Completed(BatchOutcome),
}

impl fmt::Display for TallyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
            Self::Completed(batch) => batch.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_status() {
        let mut batch = BatchOutcome::default();
        batch.push(
            "1",
            ItemStatus::Posted {
                message_id: "m".to_string(),
                persisted: true,
            },
        );
        batch.push("2", ItemStatus::Skipped(SkipReason::ChannelUnavailable));
        batch.push("3", ItemStatus::Failed("Missing Access".to_string()));
        batch.push("4", ItemStatus::Summarized);

        assert_eq!(batch.succeeded(), 2);
        assert_eq!(batch.skipped(), 1);
        assert_eq!(batch.failed(), 1);
        assert_eq!(batch.to_string(), "2 ok, 1 skipped, 1 failed");
        assert_eq!(
            batch.status_of("2"),
            Some(&ItemStatus::Skipped(SkipReason::ChannelUnavailable))
        );
        assert_eq!(batch.status_of("5"), None);
    }

    #[test]
    fn item_status_describes_itself() {
        let unsaved = ItemStatus::Posted {
            message_id: "m1".to_string(),
            persisted: false,
        };
        assert_eq!(unsaved.to_string(), "posted m1 (not persisted)");
        assert_eq!(
            ItemStatus::Skipped(SkipReason::NoRecord).to_string(),
            "skipped: no recorded announcement"
        );
        assert_eq!(
            ItemStatus::Failed("Missing Access".to_string()).to_string(),
            "failed: Missing Access"
        );
    }

    #[test]
    fn aborted_tally_renders_reason() {
        let outcome = TallyOutcome::Aborted("log channel 900 unavailable".to_string());
        assert_eq!(outcome.to_string(), "aborted: log channel 900 unavailable");
    }
}
