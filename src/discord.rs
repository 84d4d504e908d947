use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::bot::BotCore;
use crate::chat::{ChatChannel, ChatMessage, ChatService, ChatUser, InteractionHandle, ReactionCount};
use crate::config::Config;
use crate::utils::AppError;

pub mod commands;
pub mod gateway;
pub mod interaction;

pub use self::commands::command_definitions;
pub use self::interaction::parse_command_invocation;

const API_BASE: &str = "https://discord.com/api/v10";
const REACTION_PAGE_SIZE: usize = 100;
const MAX_RATE_LIMIT_RETRIES: u32 = 5;
const DEFAULT_RETRY_AFTER_SECS: f64 = 1.0;
const EPHEMERAL_FLAG: u64 = 1 << 6;

const CALLBACK_CHANNEL_MESSAGE: u8 = 4;
const CALLBACK_DEFERRED_CHANNEL_MESSAGE: u8 = 5;

#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    token: Arc<SecretString>,
    api_base: String,
    application_id: Arc<RwLock<Option<String>>>,
    bot: Arc<RwLock<Option<Arc<BotCore>>>>,
    gateway_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl DiscordClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("DiscordBot (lineup-bot, ", env!("CARGO_PKG_VERSION"), ")"))
            .build()
            .context("failed to construct HTTP client")?;

        Ok(Self {
            token: Arc::new(SecretString::from(config.auth.bot_token.clone())),
            application_id: Arc::new(RwLock::new(config.auth.application_id.clone())),
            http,
            api_base: API_BASE.to_string(),
            bot: Arc::new(RwLock::new(None)),
            gateway_task: Arc::new(Mutex::new(None)),
        })
    }

    pub async fn set_bot(&self, bot: Arc<BotCore>) {
        *self.bot.write().await = Some(bot);
    }

    /// Spawns the gateway connection; returns immediately.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.gateway_task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        let client = self.clone();
        *task = Some(tokio::spawn(async move {
            client.gateway_loop().await;
        }));
        info!("discord gateway task started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Some(task) = self.gateway_task.lock().await.take() {
            task.abort();
            let _ = task.await;
            info!("discord client stopped");
        }
        Ok(())
    }

    pub async fn register_commands(&self, application_id: &str) -> Result<()> {
        let definitions = command_definitions();
        let count = definitions.len();
        self.api(
            Method::PUT,
            &format!("/applications/{application_id}/commands"),
            Some(Value::Array(definitions)),
        )
        .await
        .context("registering slash commands failed")?;
        info!("registered {} slash commands", count);
        Ok(())
    }

    pub(crate) async fn gateway_url(&self) -> Result<String> {
        let value = self.api(Method::GET, "/gateway/bot", None).await?;
        value
            .get("url")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| anyhow!("/gateway/bot missing url"))
    }

    pub(crate) fn expose_token(&self) -> &str {
        self.token.expose_secret()
    }

    /// Rate-limited requests (429) are re-issued after the advertised delay.
    async fn api(&self, method: Method, route: &str, body: Option<Value>) -> Result<Value> {
        let mut retries = 0;
        let (status, text) = loop {
            let mut request = self
                .http
                .request(method.clone(), format!("{}{}", self.api_base, route))
                .header(
                    "Authorization",
                    format!("Bot {}", self.token.expose_secret()),
                );
            if let Some(body) = &body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("request {method} {route} failed"))?;
            let status = response.status();
            let retry_header = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(ToOwned::to_owned);
            let text = response
                .text()
                .await
                .with_context(|| format!("reading body of {method} {route} failed"))?;

            if status == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RATE_LIMIT_RETRIES {
                retries += 1;
                let delay = retry_delay(&text, retry_header.as_deref());
                warn!(
                    "{} {} rate limited, retry {} in {:?}",
                    method, route, retries, delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            break (status, text);
        };

        if !status.is_success() {
            return Err(AppError::DiscordStatus {
                route: format!("{method} {route}"),
                status: status.as_u16(),
                body: text,
            }
            .into());
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .with_context(|| format!("{method} {route} returned non-JSON body"))
    }

    async fn interaction_callback(
        &self,
        interaction: &InteractionHandle,
        payload: Value,
    ) -> Result<()> {
        self.api(
            Method::POST,
            &format!(
                "/interactions/{}/{}/callback",
                interaction.id, interaction.token
            ),
            Some(payload),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatService for DiscordClient {
    async fn resolve_channel(&self, channel_id: &str) -> Result<Option<ChatChannel>> {
        match self
            .api(Method::GET, &format!("/channels/{channel_id}"), None)
            .await
        {
            Ok(value) => Ok(Some(parse_channel(channel_id, &value))),
            Err(err) => {
                let status = err
                    .downcast_ref::<AppError>()
                    .and_then(AppError::discord_status);
                if matches!(status, Some(403 | 404)) {
                    warn!("channel {} is not viewable (status {:?})", channel_id, status);
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String> {
        let value = self
            .api(
                Method::POST,
                &format!("/channels/{channel_id}/messages"),
                Some(json!({
                    "content": content,
                    "allowed_mentions": { "parse": ["users", "roles"] }
                })),
            )
            .await?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| anyhow!("create message response missing id"))
    }

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        self.api(
            Method::PUT,
            &format!(
                "/channels/{channel_id}/messages/{message_id}/reactions/{}/@me",
                encode_emoji(emoji)
            ),
            None,
        )
        .await?;
        Ok(())
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<ChatMessage> {
        let value = self
            .api(
                Method::GET,
                &format!("/channels/{channel_id}/messages/{message_id}"),
                None,
            )
            .await?;
        Ok(parse_message(channel_id, message_id, &value))
    }

    async fn reaction_users(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<Vec<ChatUser>> {
        let base = format!(
            "/channels/{channel_id}/messages/{message_id}/reactions/{}?limit={REACTION_PAGE_SIZE}",
            encode_emoji(emoji)
        );
        let mut users = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let route = match &after {
                Some(after) => format!("{base}&after={after}"),
                None => base.clone(),
            };
            let value = self.api(Method::GET, &route, None).await?;
            let raw_len = value.as_array().map_or(0, Vec::len);
            after = value
                .as_array()
                .and_then(|page| page.last())
                .and_then(|last| last.get("id"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            users.extend(parse_users(&value));
            if raw_len < REACTION_PAGE_SIZE || after.is_none() {
                break;
            }
        }

        debug!(
            "{} users reacted with {} on {}",
            users.len(),
            emoji,
            message_id
        );
        Ok(users)
    }

    async fn reply_interaction(
        &self,
        interaction: &InteractionHandle,
        content: &str,
        ephemeral: bool,
    ) -> Result<()> {
        let mut data = json!({
            "content": content,
            "allowed_mentions": { "parse": [] }
        });
        if ephemeral {
            data["flags"] = json!(EPHEMERAL_FLAG);
        }
        self.interaction_callback(
            interaction,
            json!({ "type": CALLBACK_CHANNEL_MESSAGE, "data": data }),
        )
        .await
    }

    async fn defer_interaction(
        &self,
        interaction: &InteractionHandle,
        ephemeral: bool,
    ) -> Result<()> {
        let flags = if ephemeral { EPHEMERAL_FLAG } else { 0 };
        self.interaction_callback(
            interaction,
            json!({
                "type": CALLBACK_DEFERRED_CHANNEL_MESSAGE,
                "data": { "flags": flags }
            }),
        )
        .await
    }

    async fn edit_interaction_reply(
        &self,
        interaction: &InteractionHandle,
        content: &str,
    ) -> Result<()> {
        self.api(
            Method::PATCH,
            &format!(
                "/webhooks/{}/{}/messages/@original",
                interaction.application_id, interaction.token
            ),
            Some(json!({ "content": content })),
        )
        .await?;
        Ok(())
    }
}

/// Seconds to wait from a 429 body's `retry_after`, else the `Retry-After` header.
fn retry_delay(body: &str, header: Option<&str>) -> Duration {
    let from_body = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("retry_after").and_then(Value::as_f64));
    let from_header = header.and_then(|value| value.trim().parse::<f64>().ok());
    let seconds = from_body
        .or(from_header)
        .filter(|secs| secs.is_finite())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
        .max(0.0);
    Duration::from_secs_f64(seconds)
}

fn encode_emoji(emoji: &str) -> String {
    url::form_urlencoded::byte_serialize(emoji.as_bytes()).collect()
}

/// Custom emojis are addressed as `name:id`, unicode ones by the character.
fn emoji_key(emoji: &Value) -> Option<String> {
    let name = emoji.get("name").and_then(Value::as_str)?;
    match emoji.get("id").and_then(Value::as_str) {
        Some(id) => Some(format!("{name}:{id}")),
        None => Some(name.to_string()),
    }
}

fn parse_channel(channel_id: &str, value: &Value) -> ChatChannel {
    ChatChannel {
        id: value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(channel_id)
            .to_string(),
        name: value
            .get("name")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
    }
}

fn parse_message(channel_id: &str, message_id: &str, value: &Value) -> ChatMessage {
    let reactions = value
        .get("reactions")
        .and_then(Value::as_array)
        .map(|reactions| {
            reactions
                .iter()
                .filter_map(|reaction| {
                    Some(ReactionCount {
                        emoji: emoji_key(reaction.get("emoji")?)?,
                        count: reaction.get("count").and_then(Value::as_u64).unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ChatMessage {
        id: value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(message_id)
            .to_string(),
        channel_id: value
            .get("channel_id")
            .and_then(Value::as_str)
            .unwrap_or(channel_id)
            .to_string(),
        reactions,
    }
}

pub(crate) fn parse_user(value: &Value) -> Option<ChatUser> {
    Some(ChatUser {
        id: value.get("id").and_then(Value::as_str)?.to_string(),
        username: value.get("username").and_then(Value::as_str)?.to_string(),
        global_name: value
            .get("global_name")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        bot: value.get("bot").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn parse_users(value: &Value) -> Vec<ChatUser> {
    value
        .as_array()
        .map(|users| users.iter().filter_map(parse_user).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use salvo::conn::{Listener, TcpListener};
    use salvo::writing::Json;
    use salvo::{Request, Response, Router, Server, handler};

    use super::*;
    use crate::bot::testing::test_config;

    async fn serve_stub(port: u16, router: Router) -> String {
        let acceptor = TcpListener::new(format!("127.0.0.1:{port}")).bind().await;
        tokio::spawn(Server::new(acceptor).serve(router));
        format!("http://127.0.0.1:{port}")
    }

    fn client_for(api_base: String) -> DiscordClient {
        let mut client = DiscordClient::new(&test_config(&["100"])).expect("client");
        client.api_base = api_base;
        client
    }

    static LIMITED_ONCE_HITS: AtomicUsize = AtomicUsize::new(0);

    #[handler]
    async fn limited_once(res: &mut Response) {
        if LIMITED_ONCE_HITS.fetch_add(1, Ordering::SeqCst) == 0 {
            res.status_code(StatusCode::TOO_MANY_REQUESTS);
            res.render(Json(json!({
                "message": "You are being rate limited.",
                "retry_after": 0.05,
                "global": false
            })));
        } else {
            res.status_code(StatusCode::NO_CONTENT);
        }
    }

    static ALWAYS_LIMITED_HITS: AtomicUsize = AtomicUsize::new(0);

    #[handler]
    async fn always_limited(res: &mut Response) {
        ALWAYS_LIMITED_HITS.fetch_add(1, Ordering::SeqCst);
        res.status_code(StatusCode::TOO_MANY_REQUESTS);
        res.render(Json(json!({ "message": "slow down", "retry_after": 0.01 })));
    }

    static PAGE_REQUESTS: AtomicUsize = AtomicUsize::new(0);

    #[handler]
    async fn paged_reactions(req: &mut Request, res: &mut Response) {
        PAGE_REQUESTS.fetch_add(1, Ordering::SeqCst);
        let page: Vec<Value> = match req.query::<String>("after").as_deref() {
            None => (1..=REACTION_PAGE_SIZE)
                .map(|i| {
                    if i == 50 {
                        json!({ "id": format!("u{i}") })
                    } else {
                        json!({ "id": format!("u{i}"), "username": format!("user{i}") })
                    }
                })
                .collect(),
            Some("u100") => vec![json!({ "id": "u101", "username": "late" })],
            Some(_) => Vec::new(),
        };
        res.render(Json(page));
    }

    #[tokio::test]
    async fn rate_limited_reaction_is_retried_after_delay() {
        let base = serve_stub(58431, Router::with_path("{**rest}").put(limited_once)).await;
        let client = client_for(base);

        client
            .add_reaction("100", "m1", "❌")
            .await
            .expect("reaction after retry");

        assert_eq!(LIMITED_ONCE_HITS.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_rate_limit_gives_up_with_status() {
        let base = serve_stub(58432, Router::with_path("{**rest}").put(always_limited)).await;
        let client = client_for(base);

        let err = client
            .add_reaction("100", "m1", "✅")
            .await
            .expect_err("rate limit never lifts");

        let status = err.downcast_ref::<AppError>().and_then(AppError::discord_status);
        assert_eq!(status, Some(429));
        assert_eq!(
            ALWAYS_LIMITED_HITS.load(Ordering::SeqCst),
            MAX_RATE_LIMIT_RETRIES as usize + 1
        );
    }

    #[tokio::test]
    async fn malformed_entry_does_not_end_pagination() {
        let base = serve_stub(58433, Router::with_path("{**rest}").get(paged_reactions)).await;
        let client = client_for(base);

        let users = client
            .reaction_users("100", "m1", "✅")
            .await
            .expect("users");

        assert_eq!(PAGE_REQUESTS.load(Ordering::SeqCst), 2);
        assert_eq!(users.len(), REACTION_PAGE_SIZE);
        assert_eq!(users.last().map(|user| user.username.as_str()), Some("late"));
    }

    #[test]
    fn retry_delay_prefers_body_then_header() {
        assert_eq!(
            retry_delay(r#"{"retry_after":0.25}"#, Some("3")),
            Duration::from_millis(250)
        );
        assert_eq!(retry_delay("", Some("2")), Duration::from_secs(2));
        assert_eq!(retry_delay("not json", None), Duration::from_secs(1));
    }

    #[test]
    fn unicode_emoji_is_percent_encoded() {
        assert_eq!(encode_emoji("✅"), "%E2%9C%85");
        assert_eq!(encode_emoji("❌"), "%E2%9D%8C");
    }

    #[test]
    fn message_reactions_are_keyed_by_emoji() {
        let value = json!({
            "id": "m1",
            "channel_id": "100",
            "reactions": [
                { "count": 4, "me": true, "emoji": { "id": null, "name": "✅" } },
                { "count": 1, "me": false, "emoji": { "id": "42", "name": "party" } }
            ]
        });

        let message = parse_message("100", "m1", &value);

        assert_eq!(message.reaction_count("✅"), Some(4));
        assert_eq!(message.reaction_count("❌"), None);
        assert_eq!(message.reaction_count("party:42"), Some(1));
        assert_eq!(message.reactions[0].count, 4);
    }

    #[test]
    fn message_without_reactions_has_none() {
        let message = parse_message("100", "m1", &json!({ "id": "m1" }));
        assert!(message.reactions.is_empty());
        assert_eq!(message.channel_id, "100");
    }

    #[test]
    fn users_keep_bot_flag_and_skip_malformed_entries() {
        let value = json!([
            { "id": "1", "username": "anna", "global_name": "Anna" },
            { "id": "2", "username": "lineup", "bot": true },
            { "username": "no-id" }
        ]);

        let users = parse_users(&value);

        assert_eq!(users.len(), 2);
        assert!(!users[0].bot);
        assert_eq!(users[0].display_name(), "Anna");
        assert!(users[1].bot);
    }

    #[test]
    fn channel_falls_back_to_requested_id() {
        let channel = parse_channel("100", &json!({ "name": "lineup" }));
        assert_eq!(channel.id, "100");
        assert_eq!(channel.name.as_deref(), Some("lineup"));
    }
}
