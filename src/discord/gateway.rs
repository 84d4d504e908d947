use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{DiscordClient, parse_command_invocation, parse_user};
use crate::bot::{BotCore, CommandOutcome};
use crate::utils::AppError;
use crate::utils::task::spawn_supervised;

const INITIAL_RETRY_SECONDS: u64 = 2;
const MAX_RETRY_SECONDS: u64 = 300;
const GATEWAY_VERSION: &str = "10";

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

const INTENT_GUILDS: u64 = 1 << 0;
const ACTIVITY_WATCHING: u8 = 3;
const PRESENCE_ACTIVITY: &str = "RP-Aktivität";

type GatewayStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Reconnect(String),
    Fatal(String),
}

/// Close codes after which reconnecting with the same settings cannot succeed.
fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

fn gateway_connect_url(base: &str) -> Result<String> {
    let mut url = Url::parse(base).with_context(|| format!("invalid gateway url {base}"))?;
    url.query_pairs_mut()
        .append_pair("v", GATEWAY_VERSION)
        .append_pair("encoding", "json");
    Ok(url.to_string())
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENT_GUILDS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "lineup-bot",
                "device": "lineup-bot"
            },
            "presence": {
                "since": null,
                "activities": [{ "name": PRESENCE_ACTIVITY, "type": ACTIVITY_WATCHING }],
                "status": "online",
                "afk": false
            }
        }
    })
}

fn heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": sequence })
}

impl DiscordClient {
    pub(super) async fn gateway_loop(self) {
        let mut retry_seconds = INITIAL_RETRY_SECONDS;
        loop {
            match self.run_session().await {
                Ok(SessionEnd::Reconnect(reason)) => {
                    info!("gateway session ended: {}", reason);
                    retry_seconds = INITIAL_RETRY_SECONDS;
                }
                Ok(SessionEnd::Fatal(reason)) => {
                    error!("gateway closed permanently: {}", reason);
                    if let Some(bot) = self.bot.read().await.clone() {
                        bot.notifier()
                            .alert(&format!("Gateway beendet: {reason}"))
                            .await;
                    }
                    return;
                }
                Err(err) => warn!("gateway session failed: {:#}", err),
            }

            tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
            retry_seconds = (retry_seconds * 2).min(MAX_RETRY_SECONDS);
        }
    }

    async fn run_session(&self) -> Result<SessionEnd> {
        let url = gateway_connect_url(&self.gateway_url().await?)?;
        let (mut stream, _) = connect_async(url.as_str())
            .await
            .context("failed to connect Discord gateway")?;
        info!("discord gateway connected");

        let heartbeat_ms = wait_for_hello(&mut stream).await?;
        send_json(&mut stream, &identify_payload(self.expose_token())).await?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
        heartbeat.tick().await;
        let mut sequence: Option<u64> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    send_json(&mut stream, &heartbeat_payload(sequence)).await?;
                }
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Ping(payload))) => {
                            let _ = stream.send(WsMessage::Pong(payload)).await;
                            continue;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(1000);
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_default();
                            let detail = format!("close code {code} {reason}");
                            return Ok(if is_fatal_close(code) {
                                SessionEnd::Fatal(detail)
                            } else {
                                SessionEnd::Reconnect(detail)
                            });
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => return Err(err).context("gateway frame error"),
                        None => return Ok(SessionEnd::Reconnect("stream ended".to_string())),
                    };

                    let payload: GatewayPayload =
                        serde_json::from_str(&text).context("invalid gateway payload JSON")?;
                    if payload.s.is_some() {
                        sequence = payload.s;
                    }

                    match payload.op {
                        OP_DISPATCH => {
                            if let Some(event) = payload.t.as_deref() {
                                self.handle_dispatch(event, payload.d).await;
                            }
                        }
                        OP_HEARTBEAT => {
                            send_json(&mut stream, &heartbeat_payload(sequence)).await?;
                        }
                        OP_RECONNECT => {
                            return Ok(SessionEnd::Reconnect("reconnect requested".to_string()));
                        }
                        OP_INVALID_SESSION => {
                            return Ok(SessionEnd::Reconnect("session invalidated".to_string()));
                        }
                        OP_HEARTBEAT_ACK => {}
                        other => debug!("ignoring gateway opcode {}", other),
                    }
                }
            }
        }
    }

    async fn handle_dispatch(&self, event: &str, data: Value) {
        match event {
            "READY" => self.handle_ready(data).await,
            "INTERACTION_CREATE" => self.handle_interaction(data).await,
            _ => {}
        }
    }

    async fn handle_ready(&self, data: Value) {
        if let Some(user) = data.get("user").and_then(parse_user) {
            info!("logged in as {} ({})", user.username, user.id);
        }

        let application_id = {
            let mut current = self.application_id.write().await;
            if current.is_none() {
                *current = data
                    .pointer("/application/id")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned);
            }
            current.clone()
        };

        let Some(bot) = self.bot.read().await.clone() else {
            debug!("READY received before bot binding");
            return;
        };

        let client = self.clone();
        spawn_supervised("ready handler", bot.notifier(), async move {
            let registration = async move {
                let application_id = application_id
                    .ok_or_else(|| anyhow!("READY did not carry an application id"))?;
                client.register_commands(&application_id).await
            };
            complete_ready(&bot, registration).await
        });
    }

    async fn handle_interaction(&self, data: Value) {
        let fallback_app_id = self.application_id.read().await.clone();
        let Some(invocation) = parse_command_invocation(&data, fallback_app_id.as_deref()) else {
            debug!("ignoring non-command interaction");
            return;
        };
        let Some(bot) = self.bot.read().await.clone() else {
            warn!("interaction /{} received before bot binding", invocation.name);
            return;
        };

        spawn_supervised("slash command", bot.notifier(), async move {
            match bot.handle_command(&invocation).await {
                CommandOutcome::Ignored => debug!("/{} is not a known command", invocation.name),
                CommandOutcome::Replied(command) => debug!("{:?} answered", command),
                CommandOutcome::Failed {
                    command,
                    error_reply_sent,
                } => warn!(
                    "{:?} failed, error reply sent: {}",
                    command, error_reply_sent
                ),
            }
            Ok(())
        });
    }
}

/// The startup notice goes out even when command registration failed.
async fn complete_ready<F>(bot: &BotCore, registration: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let registered = registration.await;
    bot.on_ready().await;
    registered
}

async fn wait_for_hello(stream: &mut GatewayStream) -> Result<u64> {
    while let Some(frame) = stream.next().await {
        if let WsMessage::Text(text) = frame.context("gateway frame error")? {
            let payload: GatewayPayload =
                serde_json::from_str(&text).context("invalid gateway payload JSON")?;
            if payload.op != OP_HELLO {
                return Err(AppError::Gateway(format!(
                    "expected HELLO, got opcode {}",
                    payload.op
                ))
                .into());
            }
            return payload
                .d
                .get("heartbeat_interval")
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow!("HELLO missing heartbeat_interval"));
        }
    }
    Err(AppError::Gateway("connection closed before HELLO".to_string()).into())
}

async fn send_json(stream: &mut GatewayStream, payload: &Value) -> Result<()> {
    stream
        .send(WsMessage::Text(payload.to_string().into()))
        .await
        .context("failed to send gateway payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::{STARTUP_CHANNEL, test_bot};
    use crate::chat::mock::MockChat;
    use crate::utils::alert::STARTUP_NOTICE;

    #[tokio::test]
    async fn startup_notice_is_sent_when_registration_fails() {
        let chat = MockChat::new();
        let bot = test_bot(&chat, &["100"]);

        let result = complete_ready(&bot, async {
            Err(anyhow!("READY did not carry an application id"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(chat.sent_to(STARTUP_CHANNEL), vec![STARTUP_NOTICE.to_string()]);
    }

    #[test]
    fn connect_url_pins_version_and_encoding() {
        let url = gateway_connect_url("wss://gateway.discord.gg").unwrap();
        assert_eq!(url, "wss://gateway.discord.gg/?v=10&encoding=json");
    }

    #[test]
    fn identify_requests_guilds_intent_and_presence() {
        let payload = identify_payload("secret");
        assert_eq!(payload["op"], 2);
        assert_eq!(payload["d"]["intents"], 1);
        assert_eq!(payload["d"]["presence"]["activities"][0]["name"], "RP-Aktivität");
        assert_eq!(payload["d"]["presence"]["activities"][0]["type"], 3);
    }

    #[test]
    fn heartbeat_carries_last_sequence() {
        assert_eq!(heartbeat_payload(None), json!({ "op": 1, "d": null }));
        assert_eq!(heartbeat_payload(Some(42)), json!({ "op": 1, "d": 42 }));
    }

    #[test]
    fn authentication_failures_are_fatal() {
        assert!(is_fatal_close(4004));
        assert!(is_fatal_close(4014));
        assert!(!is_fatal_close(4000));
        assert!(!is_fatal_close(1001));
    }

    #[test]
    fn dispatch_payload_parses_with_optional_fields() {
        let payload: GatewayPayload =
            serde_json::from_str(r#"{"op":11}"#).expect("heartbeat ack");
        assert_eq!(payload.op, OP_HEARTBEAT_ACK);
        assert!(payload.t.is_none());
        assert!(payload.d.is_null());
    }
}
