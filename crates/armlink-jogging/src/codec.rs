//! Jogging frame shapes.
//!
//! * `VelocityVector` – every frame carries the full velocity vector: per
//!   joint in joint mode (`{"joint_velocities": [..]}`), translation and
//!   rotation in cartesian mode (`{"translation": [..], "rotation": [..]}`).
//!   Stopping sends zeros.  A frame counts as acknowledged once written.
//! * `Directional` – `{"command": "start", "id", "mode", "axis",
//!   "direction", "velocity"}` and `{"command": "stop", "id"}`.  The service
//!   acknowledges by echoing `{"id"}`, optionally with an `"error"`.

use armlink_types::{ArmError, Direction, JogCommand, JoggingMode};
use serde::{Deserialize, Serialize};

/// Cartesian jogging axes: X/Y/Z translation then X/Y/Z rotation.
pub const CARTESIAN_AXES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoggingCodec {
    #[default]
    VelocityVector,
    Directional,
}

#[derive(Serialize)]
#[serde(untagged)]
enum VelocityFrame {
    Joint {
        joint_velocities: Vec<f64>,
    },
    Cartesian {
        translation: [f64; 3],
        rotation: [f64; 3],
    },
}

#[derive(Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum DirectionalFrame {
    Start {
        id: u64,
        mode: JoggingMode,
        axis: usize,
        direction: Direction,
        velocity: f64,
    },
    Stop {
        id: u64,
    },
}

#[derive(Deserialize)]
struct Echo {
    id: u64,
    #[serde(default)]
    error: Option<String>,
}

pub fn degrees_to_radians(degrees: f64) -> f64 {
    degrees.to_radians()
}

pub fn radians_to_degrees(radians: f64) -> f64 {
    radians.to_degrees()
}

/// Number of jog axes in `mode`.
fn axis_count(mode: JoggingMode, joint_count: usize) -> usize {
    match mode {
        JoggingMode::Joint => joint_count,
        JoggingMode::Cartesian => CARTESIAN_AXES,
        JoggingMode::Disabled => 0,
    }
}

/// Reject commands that cannot be issued in `mode`.
///
/// # Errors
///
/// * [`ArmError::JoggingDisabled`] – `mode` is `Disabled`.
/// * [`ArmError::InvalidArgument`] – velocity negative or not finite, or
///   axis out of range.
pub fn validate_command(
    mode: JoggingMode,
    command: &JogCommand,
    joint_count: usize,
) -> Result<(), ArmError> {
    if mode == JoggingMode::Disabled {
        return Err(ArmError::JoggingDisabled);
    }
    if !command.velocity.is_finite() || command.velocity < 0.0 {
        return Err(ArmError::InvalidArgument(format!(
            "jogging velocity must be a non-negative number, got {}",
            command.velocity
        )));
    }
    let axes = axis_count(mode, joint_count);
    if command.axis >= axes {
        return Err(ArmError::InvalidArgument(format!(
            "axis {} out of range for {mode} jogging ({axes} axes)",
            command.axis
        )));
    }
    Ok(())
}

/// Signed velocity vector for `command` (zeros when `command` is `None`).
pub fn velocity_vector(
    mode: JoggingMode,
    command: Option<&JogCommand>,
    joint_count: usize,
) -> Result<Vec<f64>, ArmError> {
    let mut velocities = vec![0.0; axis_count(mode, joint_count)];
    if let Some(command) = command {
        validate_command(mode, command, joint_count)?;
        velocities[command.axis] = command.direction.sign() * command.velocity;
    }
    Ok(velocities)
}

impl JoggingCodec {
    /// `true` when the service echoes frame ids as acknowledgement.
    pub fn awaits_echo(self) -> bool {
        matches!(self, JoggingCodec::Directional)
    }

    pub fn start_frame(
        self,
        mode: JoggingMode,
        command: &JogCommand,
        joint_count: usize,
        id: u64,
    ) -> Result<String, ArmError> {
        match self {
            JoggingCodec::VelocityVector => {
                velocity_frame(mode, velocity_vector(mode, Some(command), joint_count)?)
            }
            JoggingCodec::Directional => {
                validate_command(mode, command, joint_count)?;
                encode(&DirectionalFrame::Start {
                    id,
                    mode,
                    axis: command.axis,
                    direction: command.direction,
                    velocity: command.velocity,
                })
            }
        }
    }

    pub fn stop_frame(self, mode: JoggingMode, joint_count: usize, id: u64) -> Result<String, ArmError> {
        match self {
            JoggingCodec::VelocityVector => velocity_frame(mode, velocity_vector(mode, None, joint_count)?),
            JoggingCodec::Directional => encode(&DirectionalFrame::Stop { id }),
        }
    }

    /// Interpret an inbound frame as the acknowledgement of frame `id`.
    ///
    /// `None` when the frame is unrelated (another id, a status message).
    pub fn parse_ack(self, text: &str, id: u64) -> Option<Result<(), ArmError>> {
        let echo: Echo = serde_json::from_str(text).ok()?;
        if echo.id != id {
            return None;
        }
        Some(match echo.error {
            Some(message) => Err(ArmError::Command(message)),
            None => Ok(()),
        })
    }
}

fn velocity_frame(mode: JoggingMode, velocities: Vec<f64>) -> Result<String, ArmError> {
    let frame = match mode {
        JoggingMode::Joint => VelocityFrame::Joint {
            joint_velocities: velocities,
        },
        JoggingMode::Cartesian => VelocityFrame::Cartesian {
            translation: [velocities[0], velocities[1], velocities[2]],
            rotation: [velocities[3], velocities[4], velocities[5]],
        },
        JoggingMode::Disabled => return Err(ArmError::JoggingDisabled),
    };
    encode(&frame)
}

fn encode<T: Serialize>(frame: &T) -> Result<String, ArmError> {
    serde_json::to_string(frame).map_err(|e| ArmError::Parse(e.to_string()))
}
