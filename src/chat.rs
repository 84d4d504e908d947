use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChannel {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    pub username: String,
    pub global_name: Option<String>,
    pub bot: bool,
}

impl ChatUser {
    pub fn display_name(&self) -> &str {
        self.global_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    pub reactions: Vec<ReactionCount>,
}

impl ChatMessage {
    /// `None` when nobody, including the bot, reacted with `emoji`.
    pub fn reaction_count(&self, emoji: &str) -> Option<u64> {
        self.reactions
            .iter()
            .find(|r| r.emoji == emoji && r.count > 0)
            .map(|r| r.count)
    }
}

/// The slash-command invocation a reply is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionHandle {
    pub id: String,
    pub token: String,
    pub application_id: String,
}

/// Operations the bot consumes from the chat platform.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// `Ok(None)` when the channel does not exist or is not viewable.
    async fn resolve_channel(&self, channel_id: &str) -> Result<Option<ChatChannel>>;

    /// Returns the id of the created message.
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String>;

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()>;

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<ChatMessage>;

    async fn reaction_users(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<Vec<ChatUser>>;

    async fn reply_interaction(
        &self,
        interaction: &InteractionHandle,
        content: &str,
        ephemeral: bool,
    ) -> Result<()>;

    async fn defer_interaction(&self, interaction: &InteractionHandle, ephemeral: bool)
    -> Result<()>;

    async fn edit_interaction_reply(
        &self,
        interaction: &InteractionHandle,
        content: &str,
    ) -> Result<()>;
}
