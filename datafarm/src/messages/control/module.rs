use crate::error::AgentError;
use serde::Deserialize;
use strum_macros::{Display, IntoStaticStr};

/// What an inbound command asks the agent to do.
#[derive(Display, IntoStaticStr, Copy, Clone, Debug, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    /// Switch the module on.
    On,
    /// Switch the module off.
    Off,
    /// Run the photo workflow.
    Capture,
}

/// Module message sent by the farm server, i.e. `{"command": "on"}` on
/// `farm/raspi-01/heater`. The module is named by the topic, not the body.
#[derive(Deserialize, Debug, PartialEq)]
pub struct ModuleMessage {
    /// `on` or `off`.
    pub command: String,
}

/// Command derived from one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Topic the message arrived on.
    pub topic: String,
    /// Trailing topic segment.
    pub module: String,
    /// Requested action.
    pub action: Action,
}

/// Trailing path segment of a topic.
///
/// * `topic`: full topic name.
pub fn module_name(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

impl Command {
    /// Parse an inbound message.
    ///
    /// * `topic`: topic the message arrived on.
    /// * `payload`: raw message body.
    /// * `capture_topic`: topic reserved for capture requests.
    /// * `capture_token`: exact body that requests a capture.
    pub fn parse(
        topic: &str,
        payload: &[u8],
        capture_topic: &str,
        capture_token: &str,
    ) -> Result<Self, AgentError> {
        let module = String::from(module_name(topic));
        if topic == capture_topic && payload == capture_token.as_bytes() {
            return Ok(Self {
                topic: String::from(topic),
                module,
                action: Action::Capture,
            });
        }

        let message = serde_json::from_slice::<ModuleMessage>(payload).map_err(|e| {
            AgentError::MalformedMessage {
                topic: String::from(topic),
                reason: e.to_string(),
            }
        })?;
        let action = match message.command.as_str() {
            "on" => Action::On,
            "off" => Action::Off,
            _ => {
                return Err(AgentError::UnknownCommand {
                    module,
                    command: message.command,
                })
            }
        };

        Ok(Self {
            topic: String::from(topic),
            module,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CAPTURE_TOPIC: &str = "farm/raspi-01/camera-command";

    #[rstest]
    #[case("farm/raspi-01/heater", r#"{"command": "on"}"#, "heater", Action::On)]
    #[case("farm/raspi-01/waterPump", r#"{"command":"off"}"#, "waterPump", Action::Off)]
    #[case(
        "farm/raspi-01/coolerA",
        r#"{"command": "on", "issuedBy": "dashboard"}"#,
        "coolerA",
        Action::On
    )]
    #[case(CAPTURE_TOPIC, "capture", "camera-command", Action::Capture)]
    fn test_parse_command(
        #[case] topic: &str,
        #[case] payload: &str,
        #[case] module: &str,
        #[case] action: Action,
    ) {
        let command = Command::parse(topic, payload.as_bytes(), CAPTURE_TOPIC, "capture").unwrap();
        assert_eq!(
            command,
            Command {
                topic: String::from(topic),
                module: String::from(module),
                action
            }
        );
    }

    #[rstest]
    #[case("farm/raspi-01/heater", "on")]
    #[case("farm/raspi-01/heater", "")]
    #[case("farm/raspi-01/heater", r#"{"state": "on"}"#)]
    // Capture token only counts on the capture topic.
    #[case("farm/raspi-01/led", "capture")]
    // Anything else on the capture topic falls through to json parsing.
    #[case(CAPTURE_TOPIC, "Capture")]
    fn test_malformed_payload(#[case] topic: &str, #[case] payload: &str) {
        assert!(matches!(
            Command::parse(topic, payload.as_bytes(), CAPTURE_TOPIC, "capture"),
            Err(AgentError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_unknown_command_value() {
        let result = Command::parse(
            "farm/raspi-01/heater",
            br#"{"command": "toggle"}"#,
            CAPTURE_TOPIC,
            "capture",
        );
        match result {
            Err(AgentError::UnknownCommand { module, command }) => {
                assert_eq!(module, "heater");
                assert_eq!(command, "toggle");
            }
            other => panic!("Unexpected parse result {other:?}"),
        }
    }

    #[rstest]
    #[case("farm/raspi-01/heater", "heater")]
    #[case("heater", "heater")]
    #[case("farm/raspi-01/", "")]
    fn test_module_name(#[case] topic: &str, #[case] module: &str) {
        assert_eq!(module_name(topic), module);
    }

    #[test]
    fn test_action_display() {
        assert_eq!(Action::Capture.to_string(), "capture");
        let name: &'static str = Action::On.into();
        assert_eq!(name, "on");
    }
}
