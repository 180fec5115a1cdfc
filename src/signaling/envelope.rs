//! Signalling wire format
//!
//! Every outbound frame is the envelope
//! `{"action": ..., "peerType": "camera", "message": {...}}`; the builders
//! here are the only place envelopes are constructed. Inbound frames are
//! normalised into [`SignalEvent`] values.

use crate::error::{Error, Result};
use serde_json::{json, Value};

/// This endpoint always identifies as a camera
pub const PEER_TYPE: &str = "camera";

/// Inbound signalling traffic after normalisation
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Offer { peer_id: String, sdp: String },
    Answer { peer_id: String, sdp: String },
    Candidate { peer_id: String, ice: Value },
    PeerJoined { peer_id: String, source: Option<String> },
    PeerLeft { peer_id: String },
}

/// `register` frame sent right after the socket opens
pub fn register(name: &str, fw_version: &str, ai_version: &str) -> Value {
    json!({
        "action": "register",
        "peerType": PEER_TYPE,
        "message": {
            "name": name,
            "fw_version": fw_version,
            "ai_version": ai_version,
        }
    })
}

/// SDP offer toward one peer
pub fn offer(peer_id: &str, sdp: &str) -> Value {
    sdp_frame("offer", peer_id, sdp)
}

/// SDP answer toward one peer
pub fn answer(peer_id: &str, sdp: &str) -> Value {
    sdp_frame("answer", peer_id, sdp)
}

fn sdp_frame(action: &str, peer_id: &str, sdp: &str) -> Value {
    json!({
        "action": action,
        "peerType": PEER_TYPE,
        "message": {
            "peer_id": peer_id,
            "sdp": {
                "type": action,
                "sdp": sdp,
            }
        }
    })
}

/// ICE candidate toward one peer; `sdpMid` is derived from the media line
pub fn candidate(peer_id: &str, candidate: &str, sdp_mline_index: i64) -> Value {
    json!({
        "action": "candidate",
        "peerType": PEER_TYPE,
        "message": {
            "peer_id": peer_id,
            "ice": {
                "candidate": candidate,
                "sdpMLineIndex": sdp_mline_index,
                "sdpMid": format!("video{}", sdp_mline_index),
            }
        }
    })
}

/// Periodic device telemetry
pub fn camstatus(rec_status: &str, cpu_temperature: f64, gpu_temperature: f64, rec_usage: i64) -> Value {
    json!({
        "action": "camstatus",
        "peerType": PEER_TYPE,
        "message": {
            "rec_status": rec_status,
            "cpu_temperature": cpu_temperature,
            "gpu_temperature": gpu_temperature,
            "rec_usage": rec_usage,
        }
    })
}

/// Normalise one inbound text frame.
///
/// Returns `Ok(None)` for well-formed frames with an action this bridge does
/// not handle; malformed frames are protocol errors.
pub fn parse_inbound(text: &str) -> Result<Option<SignalEvent>> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("bad JSON: {}", e)))?;

    let action = value["action"]
        .as_str()
        .ok_or_else(|| Error::Protocol("missing action".to_string()))?;
    let message = &value["message"];

    let peer_id = message["peer_id"]
        .as_str()
        .ok_or_else(|| Error::Protocol(format!("{}: missing peer_id", action)))?
        .to_string();

    let event = match action {
        "offer" => SignalEvent::Offer {
            peer_id,
            sdp: sdp_text(message, action)?,
        },
        "answer" => SignalEvent::Answer {
            peer_id,
            sdp: sdp_text(message, action)?,
        },
        "candidate" => {
            let ice = message
                .get("ice")
                .cloned()
                .ok_or_else(|| Error::Protocol("candidate: missing ice".to_string()))?;
            SignalEvent::Candidate { peer_id, ice }
        }
        "ROOM_PEER_JOINED" => SignalEvent::PeerJoined {
            peer_id,
            source: message["source"].as_str().map(String::from),
        },
        "ROOM_PEER_LEFT" => SignalEvent::PeerLeft { peer_id },
        other => {
            tracing::debug!(action = %other, "Ignoring unhandled signalling action");
            return Ok(None);
        }
    };

    Ok(Some(event))
}

fn sdp_text(message: &Value, action: &str) -> Result<String> {
    message["sdp"]["sdp"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| Error::Protocol(format!("{}: missing sdp.sdp", action)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_envelope() {
        let frame = register("barn-north", "1.2.0", "3.1");
        assert_eq!(frame["action"], "register");
        assert_eq!(frame["peerType"], "camera");
        assert_eq!(frame["message"]["name"], "barn-north");
        assert_eq!(frame["message"]["fw_version"], "1.2.0");
        assert_eq!(frame["message"]["ai_version"], "3.1");
    }

    #[test]
    fn test_sdp_envelopes() {
        let frame = offer("peer-1", "v=0...");
        assert_eq!(frame["action"], "offer");
        assert_eq!(frame["message"]["peer_id"], "peer-1");
        assert_eq!(frame["message"]["sdp"]["type"], "offer");
        assert_eq!(frame["message"]["sdp"]["sdp"], "v=0...");

        let frame = answer("peer-1", "v=0...");
        assert_eq!(frame["action"], "answer");
        assert_eq!(frame["message"]["sdp"]["type"], "answer");
    }

    #[test]
    fn test_candidate_envelope_derives_sdp_mid() {
        let frame = candidate("peer-1", "candidate:0 1 UDP ...", 1);
        let ice = &frame["message"]["ice"];
        assert_eq!(ice["candidate"], "candidate:0 1 UDP ...");
        assert_eq!(ice["sdpMLineIndex"], 1);
        assert_eq!(ice["sdpMid"], "video1");
    }

    #[test]
    fn test_camstatus_envelope() {
        let frame = camstatus("Off", 51.2, 48.0, 73);
        assert_eq!(frame["action"], "camstatus");
        let message = &frame["message"];
        assert_eq!(message["rec_status"], "Off");
        assert_eq!(message["cpu_temperature"], 51.2);
        assert_eq!(message["gpu_temperature"], 48.0);
        assert_eq!(message["rec_usage"], 73);
    }

    #[test]
    fn test_parse_inbound_answer_extracts_sdp_text() {
        let text = r#"{
            "action": "answer",
            "peerType": "camera",
            "message": {"peer_id": "X", "sdp": {"type": "answer", "sdp": "v=0"}}
        }"#;
        let event = parse_inbound(text).unwrap().unwrap();
        assert_eq!(
            event,
            SignalEvent::Answer {
                peer_id: "X".to_string(),
                sdp: "v=0".to_string()
            }
        );
    }

    #[test]
    fn test_parse_inbound_candidate_keeps_full_ice() {
        let text = r#"{
            "action": "candidate",
            "peerType": "camera",
            "message": {"peer_id": "X", "ice": {"candidate": "c", "sdpMLineIndex": 0}}
        }"#;
        let event = parse_inbound(text).unwrap().unwrap();
        match event {
            SignalEvent::Candidate { peer_id, ice } => {
                assert_eq!(peer_id, "X");
                assert_eq!(ice, serde_json::json!({"candidate": "c", "sdpMLineIndex": 0}));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_inbound_peer_joined_with_source() {
        let text = r#"{
            "action": "ROOM_PEER_JOINED",
            "peerType": "camera",
            "message": {"peer_id": "X", "source": "Thermal"}
        }"#;
        let event = parse_inbound(text).unwrap().unwrap();
        assert_eq!(
            event,
            SignalEvent::PeerJoined {
                peer_id: "X".to_string(),
                source: Some("Thermal".to_string())
            }
        );

        let text = r#"{"action": "ROOM_PEER_LEFT", "peerType": "camera", "message": {"peer_id": "X"}}"#;
        assert_eq!(
            parse_inbound(text).unwrap().unwrap(),
            SignalEvent::PeerLeft {
                peer_id: "X".to_string()
            }
        );
    }

    #[test]
    fn test_parse_inbound_errors() {
        assert!(parse_inbound("{ nope").is_err());
        assert!(parse_inbound(r#"{"message": {}}"#).is_err());
        // Missing peer_id
        assert!(parse_inbound(r#"{"action": "offer", "message": {}}"#).is_err());
        // Unknown action is ignored, not an error
        assert!(parse_inbound(r#"{"action": "lobby_stats", "message": {"peer_id": "X"}}"#)
            .unwrap()
            .is_none());
    }
}
