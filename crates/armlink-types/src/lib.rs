//! `armlink-types` – shared vocabulary of the armlink workspace.
//!
//! Wire-level motion state, motion-group metadata, jogging commands and the
//! [`ArmError`] taxonomy used by every other crate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A 3-component vector as sent on the wire (`[x, y, z]`).
pub type Vector3d = [f64; 3];

// ────────────────────────────────────────────────────────────────────────────
// Identifiers
// ────────────────────────────────────────────────────────────────────────────

/// Identifier of a motion group in `"<index>@<controller>"` form, e.g.
/// `"0@ur5e"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MotionGroupId {
    pub index: u32,
    pub controller: String,
}

impl MotionGroupId {
    pub fn new(index: u32, controller: impl Into<String>) -> Self {
        Self {
            index,
            controller: controller.into(),
        }
    }
}

impl fmt::Display for MotionGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index, self.controller)
    }
}

impl FromStr for MotionGroupId {
    type Err = ArmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, controller) = s.split_once('@').ok_or_else(|| {
            ArmError::InvalidArgument(format!("motion group id '{s}' is not '<index>@<controller>'"))
        })?;
        let index = index.parse::<u32>().map_err(|_| {
            ArmError::InvalidArgument(format!("motion group index '{index}' is not a number"))
        })?;
        if controller.is_empty() {
            return Err(ArmError::InvalidArgument(format!(
                "motion group id '{s}' has an empty controller"
            )));
        }
        Ok(Self::new(index, controller))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Motion state
// ────────────────────────────────────────────────────────────────────────────

/// Tool-center-point pose: position in millimetres and orientation as a
/// rotation vector (axis × angle, radians).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3d,
    pub orientation: Vector3d,
}

/// One decoded telemetry frame for a motion group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionGroupState {
    pub motion_group: String,
    pub controller: String,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    /// Joint positions in radians, one per axis.
    pub joint_position: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_pose: Option<Pose>,
    /// Name of the TCP the pose refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standstill: Option<bool>,
}

/// Lifecycle state of a reconnecting stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

// ────────────────────────────────────────────────────────────────────────────
// Jogging
// ────────────────────────────────────────────────────────────────────────────

/// Which kind of motion a jogging session issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoggingMode {
    /// Rotate individual joints.
    Joint,
    /// Translate / rotate the TCP in a coordinate system.
    Cartesian,
    #[default]
    Disabled,
}

impl fmt::Display for JoggingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoggingMode::Joint => write!(f, "joint"),
            JoggingMode::Cartesian => write!(f, "cartesian"),
            JoggingMode::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for JoggingMode {
    type Err = ArmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "joint" => Ok(JoggingMode::Joint),
            "cartesian" | "tcp" => Ok(JoggingMode::Cartesian),
            "disabled" | "off" => Ok(JoggingMode::Disabled),
            other => Err(ArmError::InvalidArgument(format!("unknown jogging mode '{other}'"))),
        }
    }
}

/// Direction of a jogging motion along an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "+")]
    Positive,
    #[serde(rename = "-")]
    Negative,
}

impl Direction {
    /// `1.0` or `-1.0`.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Positive => 1.0,
            Direction::Negative => -1.0,
        }
    }
}

impl FromStr for Direction {
    type Err = ArmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" | "pos" | "positive" => Ok(Direction::Positive),
            "-" | "neg" | "negative" => Ok(Direction::Negative),
            other => Err(ArmError::InvalidArgument(format!("unknown direction '{other}'"))),
        }
    }
}

/// A continuous motion request: move `axis` in `direction` at `velocity`.
///
/// In joint mode `axis` is the joint index and `velocity` is in rad/s. In
/// cartesian mode axes `0..=2` translate along X/Y/Z (mm/s) and `3..=5`
/// rotate about X/Y/Z (rad/s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JogCommand {
    pub axis: usize,
    pub direction: Direction,
    pub velocity: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Static metadata
// ────────────────────────────────────────────────────────────────────────────

/// A controller and the motion groups it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub controller: String,
    #[serde(default)]
    pub motion_groups: Vec<MotionGroupInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionGroupInfo {
    pub motion_group: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model_from_controller: Option<String>,
}

/// Denavit–Hartenberg parameters of one kinematic link.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DhParameter {
    pub alpha: f64,
    pub theta: f64,
    pub a: f64,
    pub d: f64,
    pub reverse_rotation_direction: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitRange {
    pub lower_limit: f64,
    pub upper_limit: f64,
}

/// Operating limits of a single joint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JointLimits {
    pub position: Option<LimitRange>,
    pub velocity: Option<f64>,
    pub acceleration: Option<f64>,
    pub torque: Option<f64>,
}

/// Kinematic description of a motion group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicDescription {
    pub motion_group_model: Option<String>,
    pub dh_parameters: Vec<DhParameter>,
    pub joint_limits: Vec<JointLimits>,
    pub mounting: Option<Pose>,
    /// Controller cycle time in milliseconds.
    pub cycle_time: Option<u32>,
}

/// A tool frame mounted on the flange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotTcp {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub pose: Pose,
}

/// A safety zone. The geometry is kept as raw JSON since armlink never
/// evaluates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyZone {
    pub id: u32,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub geometry: serde_json::Value,
}

/// Static description of a connected motion group, fetched once at connect
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionGroupMetadata {
    pub controller: ControllerInfo,
    pub motion_group: MotionGroupInfo,
    pub kinematics: KinematicDescription,
    pub tcps: Vec<RobotTcp>,
    pub safety_zones: Vec<SafetyZone>,
    pub is_virtual: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error taxonomy shared by every armlink crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArmError {
    /// Connection refused, dropped or otherwise unusable.
    #[error("Transport Error: {0}")]
    Transport(String),

    /// The stream was closed by the caller; no further frames will arrive.
    #[error("Stream Closed")]
    Closed,

    /// A frame or response body could not be decoded.
    #[error("Protocol Parse Error: {0}")]
    Parse(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    /// The service answered, but does not support the operation.
    #[error("Unsupported Operation: {0}")]
    Unsupported(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A jogging command was rejected by the service.
    #[error("Command Rejected: {0}")]
    Command(String),

    #[error("Timed Out: {0}")]
    Timeout(String),

    #[error("Jogging is disabled")]
    JoggingDisabled,

    #[error("Invalid Argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl ArmError {
    /// `true` when the error is a well-formed "the service said no" answer
    /// rather than a transport failure.
    pub fn is_service_response(&self) -> bool {
        matches!(
            self,
            ArmError::Unsupported(_) | ArmError::Http { .. } | ArmError::NotFound { .. }
        )
    }
}
