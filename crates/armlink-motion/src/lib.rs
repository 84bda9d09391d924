//! `armlink-motion` – Motion Telemetry
//!
//! Turns the raw state-stream of a motion group into a snapshot that only
//! changes when something a caller can see has changed.
//!
//! # Modules
//!
//! - [`rotation`] – rotation-vector algebra and
//!   [`unwrap_rotation_vector`][rotation::unwrap_rotation_vector], which keeps
//!   orientation angles continuous across frames.
//! - [`codec`] – [`TelemetryCodec`]: the wire schemas a deployment can speak.
//! - [`reconciler`] – [`MotionStateReconciler`]: delta suppression and
//!   orientation continuity, published through a `watch` channel.

pub mod codec;
pub mod reconciler;
pub mod rotation;

pub use codec::TelemetryCodec;
pub use reconciler::{
    MOTION_DELTA_THRESHOLD, MotionStateReconciler, MotionStateSnapshot, ReconcileOutcome,
    joint_values_equal, tcp_pose_equal,
};
pub use rotation::{Vec3, unwrap_rotation_vector, wrap_angle_delta};
