//! Agent event vocabulary — envelope decoding for the container channel.
//!
//! The agent multiplexes everything onto one named channel; only four
//! events matter to the pool. Everything else on the wire is dropped
//! without touching state.

use serde::Deserialize;

pub const EVENT_CHANNEL: &str = "browser:container:event";

/// Typed events the in-container agent can deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The agent is live; carries its self-assigned id and container ip.
    SetState { id: String, ip: String },
    /// Upsert one label.
    SetLabel { name: String, value: String },
    /// Upsert one label (parameter spelling of `SetLabel`).
    SetParam { name: String, value: String },
    /// Terminal notification from a dying container.
    Deleted {
        is_error: bool,
        message: String,
        session_data: Option<String>,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    channel: Option<String>,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct SetStatePayload {
    id: String,
    ip: String,
}

#[derive(Deserialize)]
struct SetLabelPayload {
    #[serde(rename = "labelName")]
    label_name: String,
    #[serde(rename = "labelValue")]
    label_value: String,
}

#[derive(Deserialize)]
struct SetParamPayload {
    param: String,
    value: String,
}

#[derive(Deserialize)]
struct DeletedPayload {
    #[serde(rename = "isError", default)]
    is_error: bool,
    #[serde(default)]
    message: String,
    #[serde(rename = "sessionData")]
    session_data: Option<String>,
}

/// Decode one wire message. `Ok(None)` for foreign channels and unknown
/// events; a malformed payload on a known event is an error so the link
/// can log it.
pub fn decode(text: &str) -> Result<Option<AgentEvent>, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if let Some(channel) = &envelope.channel {
        if channel != EVENT_CHANNEL {
            return Ok(None);
        }
    }

    let event = match envelope.event.as_str() {
        "node:setState" => {
            let payload: SetStatePayload = serde_json::from_value(envelope.payload)?;
            AgentEvent::SetState {
                id: payload.id,
                ip: payload.ip,
            }
        }
        "node:setLabel" => {
            let payload: SetLabelPayload = serde_json::from_value(envelope.payload)?;
            AgentEvent::SetLabel {
                name: payload.label_name,
                value: payload.label_value,
            }
        }
        "node:setParam" => {
            let payload: SetParamPayload = serde_json::from_value(envelope.payload)?;
            AgentEvent::SetParam {
                name: payload.param,
                value: payload.value,
            }
        }
        "node:deleted" => {
            let payload: DeletedPayload = serde_json::from_value(envelope.payload)?;
            AgentEvent::Deleted {
                is_error: payload.is_error,
                message: payload.message,
                session_data: payload.session_data,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_set_state() {
        let event = decode(
            r#"{"channel":"browser:container:event","event":"node:setState","payload":{"id":"A1","ip":"10.0.0.1"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            Some(AgentEvent::SetState {
                id: "A1".to_string(),
                ip: "10.0.0.1".to_string()
            })
        );
    }

    #[test]
    fn test_decode_set_label() {
        let event = decode(
            r#"{"event":"node:setLabel","payload":{"labelName":"proxy","labelValue":"eu-1"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            Some(AgentEvent::SetLabel {
                name: "proxy".to_string(),
                value: "eu-1".to_string()
            })
        );
    }

    #[test]
    fn test_decode_set_param() {
        let event =
            decode(r#"{"event":"node:setParam","payload":{"param":"tz","value":"UTC"}}"#).unwrap();
        assert_eq!(
            event,
            Some(AgentEvent::SetParam {
                name: "tz".to_string(),
                value: "UTC".to_string()
            })
        );
    }

    #[test]
    fn test_decode_deleted_with_session_data() {
        let event = decode(
            r#"{"event":"node:deleted","payload":{"isError":true,"message":"m","sessionData":"S"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            Some(AgentEvent::Deleted {
                is_error: true,
                message: "m".to_string(),
                session_data: Some("S".to_string())
            })
        );
    }

    #[test]
    fn test_decode_deleted_defaults() {
        let event = decode(r#"{"event":"node:deleted","payload":{}}"#).unwrap();
        assert_eq!(
            event,
            Some(AgentEvent::Deleted {
                is_error: false,
                message: String::new(),
                session_data: None
            })
        );
    }

    #[test]
    fn test_decode_unknown_event_ignored() {
        let event = decode(r#"{"event":"node:somethingElse","payload":{"x":1}}"#).unwrap();
        assert_eq!(event, None);
    }

    #[test]
    fn test_decode_foreign_channel_ignored() {
        let event = decode(
            r#"{"channel":"browser:metrics","event":"node:setState","payload":{"id":"A","ip":"1"}}"#,
        )
        .unwrap();
        assert_eq!(event, None);
    }

    #[test]
    fn test_decode_malformed_payload_is_error() {
        assert!(decode(r#"{"event":"node:setState","payload":{"id":"A"}}"#).is_err());
        assert!(decode("not json").is_err());
    }
}
