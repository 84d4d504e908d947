use serde_json::Value;

use crate::bot::CommandInvocation;
use crate::chat::InteractionHandle;

const APPLICATION_COMMAND: u64 = 2;

/// Extracts a slash command from an INTERACTION_CREATE payload. Component
/// clicks, autocomplete and other interaction types yield `None`.
pub fn parse_command_invocation(
    data: &Value,
    fallback_app_id: Option<&str>,
) -> Option<CommandInvocation> {
    if data.get("type").and_then(Value::as_u64) != Some(APPLICATION_COMMAND) {
        return None;
    }

    let name = data.pointer("/data/name").and_then(Value::as_str)?;
    let id = data.get("id").and_then(Value::as_str)?;
    let token = data.get("token").and_then(Value::as_str)?;
    let application_id = data
        .get("application_id")
        .and_then(Value::as_str)
        .or(fallback_app_id)?;

    // Guild invocations nest the user inside `member`, DMs carry it directly.
    let invoked_by = data
        .pointer("/member/user")
        .or_else(|| data.get("user"))
        .and_then(super::parse_user)
        .map(|user| user.display_name().to_string());

    Some(CommandInvocation {
        name: name.to_string(),
        invoked_by,
        interaction: InteractionHandle {
            id: id.to_string(),
            token: token.to_string(),
            application_id: application_id.to_string(),
        },
    })
}
