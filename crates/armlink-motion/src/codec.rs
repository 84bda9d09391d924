//! Telemetry wire schemas.
//!
//! Every state-stream frame is a JSON envelope `{"result": { .. }}`.  The
//! two supported schemas differ only in how joint positions are nested:
//!
//! | Codec          | Joint field                           |
//! |----------------|---------------------------------------|
//! | `JointArray`   | `result.joint_position: [f64, ..]`    |
//! | `Structured`   | `result.joint_position.joints: [..]`  |
//!
//! A deployment picks exactly one; frames in the other shape are rejected
//! as [`ArmError::Parse`].

use std::fmt;
use std::str::FromStr;

use armlink_types::{ArmError, MotionGroupState, Pose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire schema of the motion-group state stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryCodec {
    #[default]
    JointArray,
    Structured,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Serialize, Deserialize)]
struct JointVector {
    joints: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct WireState<J> {
    motion_group: String,
    controller: String,
    sequence_number: u64,
    timestamp: DateTime<Utc>,
    joint_position: J,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tcp_pose: Option<Pose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tcp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    standstill: Option<bool>,
}

impl<J> WireState<J> {
    fn into_state(self, joints: impl FnOnce(J) -> Vec<f64>) -> MotionGroupState {
        MotionGroupState {
            motion_group: self.motion_group,
            controller: self.controller,
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
            joint_position: joints(self.joint_position),
            tcp_pose: self.tcp_pose,
            tcp: self.tcp,
            standstill: self.standstill,
        }
    }

    fn from_state(state: &MotionGroupState, joints: J) -> Self {
        Self {
            motion_group: state.motion_group.clone(),
            controller: state.controller.clone(),
            sequence_number: state.sequence_number,
            timestamp: state.timestamp,
            joint_position: joints,
            tcp_pose: state.tcp_pose,
            tcp: state.tcp.clone(),
            standstill: state.standstill,
        }
    }
}

impl TelemetryCodec {
    /// Decode one state-stream frame.
    pub fn decode(self, text: &str) -> Result<MotionGroupState, ArmError> {
        let state = match self {
            TelemetryCodec::JointArray => {
                serde_json::from_str::<Envelope<WireState<Vec<f64>>>>(text)
                    .map(|env| env.result.into_state(|joints| joints))
            }
            TelemetryCodec::Structured => {
                serde_json::from_str::<Envelope<WireState<JointVector>>>(text)
                    .map(|env| env.result.into_state(|v| v.joints))
            }
        }
        .map_err(|e| ArmError::Parse(format!("{self} telemetry frame: {e}")))?;

        if state.joint_position.is_empty() {
            return Err(ArmError::Parse(format!(
                "{self} telemetry frame for '{}' has no joint positions",
                state.motion_group
            )));
        }
        Ok(state)
    }

    /// Encode a state as this schema would send it.  Used by simulators and
    /// test servers.
    pub fn encode(self, state: &MotionGroupState) -> String {
        let encoded = match self {
            TelemetryCodec::JointArray => serde_json::to_string(&Envelope {
                result: WireState::from_state(state, state.joint_position.clone()),
            }),
            TelemetryCodec::Structured => serde_json::to_string(&Envelope {
                result: WireState::from_state(
                    state,
                    JointVector {
                        joints: state.joint_position.clone(),
                    },
                ),
            }),
        };
        // Plain structs of strings and finite numbers always serialise.
        encoded.unwrap_or_default()
    }
}

impl fmt::Display for TelemetryCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryCodec::JointArray => write!(f, "joint_array"),
            TelemetryCodec::Structured => write!(f, "structured"),
        }
    }
}

impl FromStr for TelemetryCodec {
    type Err = ArmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "joint_array" | "v2" => Ok(TelemetryCodec::JointArray),
            "structured" | "v1" => Ok(TelemetryCodec::Structured),
            other => Err(ArmError::Config(format!("unknown telemetry schema '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOINT_ARRAY_FRAME: &str = r#"{"result":{
        "motion_group": "0@mock-ur5e",
        "controller": "mock-ur5e",
        "sequence_number": 1083,
        "timestamp": "2025-10-16T09:19:26.634534092Z",
        "joint_position": [1.1699, -1.5700, 1.3600, 1.0300, 1.5700, -1.5700],
        "standstill": true,
        "tcp": "Flange",
        "tcp_pose": {"position": [-226.2, -432.5, 443.1], "orientation": [1.2, -1.2, -1.2]}
    }}"#;

    const STRUCTURED_FRAME: &str = r#"{"result":{
        "motion_group": "0@mock-ur5e",
        "controller": "mock-ur5e",
        "sequence_number": 12,
        "timestamp": "2025-10-16T09:19:26Z",
        "joint_position": {"joints": [0.0, 0.5, 1.0]}
    }}"#;

    #[test]
    fn decodes_joint_array_frames() {
        let state = TelemetryCodec::JointArray.decode(JOINT_ARRAY_FRAME).unwrap();
        assert_eq!(state.sequence_number, 1083);
        assert_eq!(state.joint_position.len(), 6);
        assert_eq!(state.tcp.as_deref(), Some("Flange"));
        assert_eq!(state.standstill, Some(true));
        let pose = state.tcp_pose.unwrap();
        assert_eq!(pose.position, [-226.2, -432.5, 443.1]);
    }

    #[test]
    fn decodes_structured_frames() {
        let state = TelemetryCodec::Structured.decode(STRUCTURED_FRAME).unwrap();
        assert_eq!(state.joint_position, vec![0.0, 0.5, 1.0]);
        assert!(state.tcp_pose.is_none());
        assert!(state.standstill.is_none());
    }

    #[test]
    fn rejects_frames_in_the_other_schema() {
        let err = TelemetryCodec::Structured.decode(JOINT_ARRAY_FRAME).unwrap_err();
        assert!(matches!(err, ArmError::Parse(_)));
        let err = TelemetryCodec::JointArray.decode(STRUCTURED_FRAME).unwrap_err();
        assert!(matches!(err, ArmError::Parse(_)));
    }

    #[test]
    fn rejects_malformed_json_and_missing_envelope() {
        assert!(matches!(
            TelemetryCodec::JointArray.decode("not json"),
            Err(ArmError::Parse(_))
        ));
        assert!(matches!(
            TelemetryCodec::JointArray.decode(r#"{"joint_position": [1.0]}"#),
            Err(ArmError::Parse(_))
        ));
    }

    #[test]
    fn rejects_frames_without_joints() {
        let frame = r#"{"result":{"motion_group":"0@a","controller":"a","sequence_number":1,
            "timestamp":"2025-10-16T09:19:26Z","joint_position":[]}}"#;
        let err = TelemetryCodec::JointArray.decode(frame).unwrap_err();
        assert!(err.to_string().contains("no joint positions"), "{err}");
    }

    #[test]
    fn encoded_structured_frame_nests_joints() {
        let state = TelemetryCodec::JointArray.decode(JOINT_ARRAY_FRAME).unwrap();
        let encoded = TelemetryCodec::Structured.encode(&state);
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["result"]["joint_position"]["joints"][0], 1.1699);
        assert_eq!(TelemetryCodec::Structured.decode(&encoded).unwrap(), state);
    }

    #[test]
    fn parses_schema_names() {
        assert_eq!("joint-array".parse::<TelemetryCodec>().unwrap(), TelemetryCodec::JointArray);
        assert_eq!("Structured".parse::<TelemetryCodec>().unwrap(), TelemetryCodec::Structured);
        assert!(matches!("v3".parse::<TelemetryCodec>(), Err(ArmError::Config(_))));
    }
}
