use serde_json::{Value, json};

const CHAT_INPUT: u8 = 1;

const DEFINITIONS: &[(&str, &str)] = &[
    ("aufstellung", "Postet sofort eine Aufstellung"),
    ("manual_aufstellung", "Postet manuell"),
    ("ping", "Antwortet mit Pong!"),
    ("info", "Infos zum Bot"),
];

/// Global slash commands, registered as a bulk overwrite on every READY.
pub fn command_definitions() -> Vec<Value> {
    DEFINITIONS
        .iter()
        .map(|(name, description)| {
            json!({
                "name": name,
                "description": description,
                "type": CHAT_INPUT,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::BotCommand;

    #[test]
    fn every_registered_command_is_handled() {
        for definition in command_definitions() {
            let name = definition["name"].as_str().expect("name");
            assert!(
                BotCommand::from_name(name).is_some(),
                "/{name} has no handler"
            );
        }
    }

    #[test]
    fn definitions_are_chat_input_commands() {
        let definitions = command_definitions();
        assert_eq!(definitions.len(), 4);
        assert!(definitions.iter().all(|d| d["type"] == 1));
        assert!(definitions.iter().all(|d| !d["description"].as_str().unwrap_or("").is_empty()));
    }
}
