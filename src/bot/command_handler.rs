use anyhow::{Result, bail};
use tracing::{debug, error, info, warn};

use super::BotCore;
use crate::chat::{ChatService, InteractionHandle};

pub const PONG_REPLY: &str = "🏓 Pong!";
pub const INFO_REPLY: &str =
    "🤖 Ich poste täglich um 20 Uhr die Aufstellung und werte um 19 Uhr aus.";
pub const POSTED_REPLY: &str = "📨 Aufstellung gesendet";
pub const FAILURE_REPLY: &str = "❌ Fehler beim Ausführen.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    ManualPost,
    Ping,
    Info,
}

impl BotCommand {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aufstellung" | "manual_aufstellung" => Some(Self::ManualPost),
            "ping" => Some(Self::Ping),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub name: String,
    pub invoked_by: Option<String>,
    pub interaction: InteractionHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Ignored,
    Replied(BotCommand),
    Failed {
        command: BotCommand,
        error_reply_sent: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyState {
    Pending,
    Deferred,
    Replied,
}

/// Allows exactly one initial response per interaction. The slot counts as
/// used as soon as a response is attempted, whether or not it arrived.
pub struct ReplyGuard<'a> {
    chat: &'a dyn ChatService,
    interaction: &'a InteractionHandle,
    state: ReplyState,
}

impl<'a> ReplyGuard<'a> {
    pub fn new(chat: &'a dyn ChatService, interaction: &'a InteractionHandle) -> Self {
        Self {
            chat,
            interaction,
            state: ReplyState::Pending,
        }
    }

    pub fn has_responded(&self) -> bool {
        self.state != ReplyState::Pending
    }

    pub async fn reply(&mut self, content: &str, ephemeral: bool) -> Result<()> {
        if self.has_responded() {
            bail!("interaction {} was already answered", self.interaction.id);
        }
        self.state = ReplyState::Replied;
        self.chat
            .reply_interaction(self.interaction, content, ephemeral)
            .await
    }

    pub async fn defer(&mut self, ephemeral: bool) -> Result<()> {
        if self.has_responded() {
            bail!("interaction {} was already answered", self.interaction.id);
        }
        self.state = ReplyState::Deferred;
        self.chat.defer_interaction(self.interaction, ephemeral).await
    }

    /// Completes a deferred response, or replies directly if nothing was sent yet.
    pub async fn finish(&mut self, content: &str, ephemeral: bool) -> Result<()> {
        match self.state {
            ReplyState::Pending => self.reply(content, ephemeral).await,
            ReplyState::Deferred => {
                self.state = ReplyState::Replied;
                self.chat
                    .edit_interaction_reply(self.interaction, content)
                    .await
            }
            ReplyState::Replied => {
                bail!("interaction {} was already answered", self.interaction.id)
            }
        }
    }
}

impl BotCore {
    pub async fn handle_command(&self, invocation: &CommandInvocation) -> CommandOutcome {
        let Some(command) = BotCommand::from_name(&invocation.name) else {
            debug!("ignoring unknown command /{}", invocation.name);
            return CommandOutcome::Ignored;
        };
        info!(
            "command /{} invoked by {}",
            invocation.name,
            invocation.invoked_by.as_deref().unwrap_or("unknown user")
        );

        let mut guard = ReplyGuard::new(self.chat.as_ref(), &invocation.interaction);
        let err = match self.run_command(command, &mut guard).await {
            Ok(()) => return CommandOutcome::Replied(command),
            Err(err) => err,
        };

        error!("command /{} failed: {:#}", invocation.name, err);
        self.notifier
            .alert(&format!("SlashCommand Fehler: {err:#}"))
            .await;

        if guard.has_responded() {
            return CommandOutcome::Failed {
                command,
                error_reply_sent: false,
            };
        }
        let error_reply_sent = match guard.reply(FAILURE_REPLY, true).await {
            Ok(()) => true,
            Err(reply_err) => {
                warn!("failed to send error reply: {:#}", reply_err);
                false
            }
        };
        CommandOutcome::Failed {
            command,
            error_reply_sent,
        }
    }

    async fn run_command(&self, command: BotCommand, guard: &mut ReplyGuard<'_>) -> Result<()> {
        match command {
            BotCommand::ManualPost => {
                guard.defer(true).await?;
                let outcome = self.post_all().await;
                debug!("manual announcement round: {}", outcome);
                guard.finish(POSTED_REPLY, true).await
            }
            BotCommand::Ping => guard.reply(PONG_REPLY, false).await,
            BotCommand::Info => guard.reply(INFO_REPLY, false).await,
        }
    }
}
