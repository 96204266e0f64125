//! Wire envelope: the one JSON shape exchanged over a connection in
//! either direction, one envelope per frame.
//!
//! The connection upgrade and framing themselves belong to the
//! transport layer (see `range-sync-app`'s websocket actor); this
//! module only defines what a frame's JSON *contains* once decoded.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::SagaId;

/// An envelope received from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEnvelope {
    #[serde(rename = "register")]
    Register { id: String, name: String },

    #[serde(rename = "event")]
    Event {
        event_type: String,
        #[serde(default)]
        payload: Value,
        /// Accepted for wire-shape completeness only: the server
        /// never trusts a client-supplied `source`, it always stamps
        /// the registered connection id instead.
        #[serde(default)]
        source: Option<String>,
    },

    #[serde(rename = "step.completed")]
    StepCompleted { saga_id: String, step_id: usize },

    #[serde(rename = "step.failed")]
    StepFailed { saga_id: String, step_id: usize },
}

/// An envelope sent to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEnvelope {
    #[serde(rename = "registered")]
    Registered { status: &'static str },

    #[serde(rename = "command")]
    Command {
        command: String,
        params: Value,
        saga_id: String,
        step_id: usize,
    },

    #[serde(rename = "error")]
    Error { status: &'static str },
}

impl OutboundEnvelope {
    pub fn registered_ok() -> Self {
        OutboundEnvelope::Registered { status: "ok" }
    }

    pub fn queue_full() -> Self {
        OutboundEnvelope::Error { status: "queue_full" }
    }

    pub fn command(saga_id: &SagaId, step_id: usize, command: &str, params: &Value) -> Self {
        OutboundEnvelope::Command {
            command: command.to_string(),
            params: params.clone(),
            saga_id: saga_id.0.clone(),
            step_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_round_trips() {
        let raw = r#"{"type":"register","id":"vr","name":"VR Rig"}"#;
        let parsed: InboundEnvelope = serde_json::from_str(raw).unwrap();
        match parsed {
            InboundEnvelope::Register { id, name } => {
                assert_eq!(id, "vr");
                assert_eq!(name, "VR Rig");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn event_ignores_client_supplied_source_field_shape() {
        let raw = r#"{"type":"event","event_type":"attack.detected","payload":{},"source":"spoofed"}"#;
        let parsed: InboundEnvelope = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed, InboundEnvelope::Event { .. }));
    }

    #[test]
    fn command_envelope_serializes_expected_shape() {
        let env = OutboundEnvelope::command(
            &SagaId("s1".to_string()),
            0,
            "show_alert",
            &serde_json::json!({"msg": "!"}),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["command"], "show_alert");
        assert_eq!(value["saga_id"], "s1");
        assert_eq!(value["step_id"], 0);
    }

    #[test]
    fn queue_full_error_serializes_expected_shape() {
        let value = serde_json::to_value(OutboundEnvelope::queue_full()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["status"], "queue_full");
    }
}
