//! Motion-state reconciliation.
//!
//! The state stream reports at controller rate even while the robot stands
//! still, and sensor noise makes consecutive frames differ in the last
//! digits.  [`MotionStateReconciler`] folds frames into a
//! [`MotionStateSnapshot`] and only publishes a new snapshot when joints or
//! TCP pose moved by more than a threshold.  Accepted orientations are
//! unwrapped against the stored one so rotation angles evolve continuously.

use std::sync::Arc;

use armlink_types::{ArmError, MotionGroupState, Pose};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::trace;

use crate::codec::TelemetryCodec;
use crate::rotation::unwrap_rotation_vector;

/// Default suppression threshold (radians for joints, summed absolute
/// components for poses).
pub const MOTION_DELTA_THRESHOLD: f64 = 1e-4;

/// Reconciled view of a motion group.  Cloning is cheap: joint positions
/// are shared.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionStateSnapshot {
    pub motion_group: String,
    pub controller: String,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    /// Joint positions in radians.  Replaced wholesale on change.
    pub joint_position: Arc<[f64]>,
    pub tcp_pose: Option<Pose>,
    pub tcp: Option<String>,
    pub standstill: Option<bool>,
}

impl From<MotionGroupState> for MotionStateSnapshot {
    fn from(state: MotionGroupState) -> Self {
        Self {
            motion_group: state.motion_group,
            controller: state.controller,
            sequence_number: state.sequence_number,
            timestamp: state.timestamp,
            joint_position: state.joint_position.into(),
            tcp_pose: state.tcp_pose,
            tcp: state.tcp,
            standstill: state.standstill,
        }
    }
}

/// Which parts of the snapshot an update replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    pub joints_changed: bool,
    pub pose_changed: bool,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        self.joints_changed || self.pose_changed
    }
}

/// `true` when both joint vectors have the same length and no component
/// moved by more than `threshold`.
pub fn joint_values_equal(old: &[f64], new: &[f64], threshold: f64) -> bool {
    old.len() == new.len() && old.iter().zip(new).all(|(a, b)| (a - b).abs() <= threshold)
}

/// `true` when the summed absolute difference over position and orientation
/// is at most `threshold`.  A pose appearing or disappearing is a change.
pub fn tcp_pose_equal(old: Option<&Pose>, new: Option<&Pose>, threshold: f64) -> bool {
    match (old, new) {
        (None, None) => true,
        (Some(old), Some(new)) => {
            let position: f64 = old.position.iter().zip(&new.position).map(|(a, b)| (a - b).abs()).sum();
            let orientation: f64 = old
                .orientation
                .iter()
                .zip(&new.orientation)
                .map(|(a, b)| (a - b).abs())
                .sum();
            position + orientation <= threshold
        }
        _ => false,
    }
}

/// Folds telemetry frames into a noise-free snapshot.
///
/// Single writer: the owner calls [`apply`][Self::apply] /
/// [`apply_frame`][Self::apply_frame]; readers hold
/// [`subscribe`][Self::subscribe] receivers which only wake on accepted
/// changes.
#[derive(Debug)]
pub struct MotionStateReconciler {
    codec: TelemetryCodec,
    threshold: f64,
    current: Arc<MotionStateSnapshot>,
    tx: watch::Sender<Arc<MotionStateSnapshot>>,
}

impl MotionStateReconciler {
    /// Seed the reconciler with the first decoded frame.  The raw pose is
    /// stored as-is since there is nothing to unwrap against.
    pub fn new(initial: MotionGroupState, codec: TelemetryCodec) -> Self {
        let current = Arc::new(MotionStateSnapshot::from(initial));
        let (tx, _) = watch::channel(current.clone());
        Self {
            codec,
            threshold: MOTION_DELTA_THRESHOLD,
            current,
            tx,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn codec(&self) -> TelemetryCodec {
        self.codec
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The latest accepted snapshot.
    pub fn snapshot(&self) -> Arc<MotionStateSnapshot> {
        self.current.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MotionStateSnapshot>> {
        self.tx.subscribe()
    }

    /// Decode a raw frame with the configured codec and apply it.  Decode
    /// failures leave the snapshot untouched.
    pub fn apply_frame(&mut self, text: &str) -> Result<ReconcileOutcome, ArmError> {
        let state = self.codec.decode(text)?;
        Ok(self.apply(state))
    }

    /// Fold one decoded frame into the snapshot.
    pub fn apply(&mut self, state: MotionGroupState) -> ReconcileOutcome {
        let current = &self.current;

        let joints_changed =
            !joint_values_equal(&current.joint_position, &state.joint_position, self.threshold);

        // Compare against the continuity-corrected candidate so an already
        // unwrapped stored orientation does not register as a change on
        // every frame.
        let candidate_pose = match (current.tcp_pose.as_ref(), state.tcp_pose) {
            (Some(previous), Some(new)) => Some(Pose {
                position: new.position,
                orientation: unwrap_rotation_vector(new.orientation, previous.orientation),
            }),
            (_, new) => new,
        };
        let pose_changed =
            !tcp_pose_equal(current.tcp_pose.as_ref(), candidate_pose.as_ref(), self.threshold);

        let outcome = ReconcileOutcome {
            joints_changed,
            pose_changed,
        };
        if !outcome.changed() {
            trace!(
                motion_group = %current.motion_group,
                sequence_number = state.sequence_number,
                "telemetry frame within threshold"
            );
            return outcome;
        }

        let mut next = MotionStateSnapshot::clone(current);
        next.sequence_number = next.sequence_number.max(state.sequence_number);
        next.timestamp = next.timestamp.max(state.timestamp);
        if joints_changed {
            next.joint_position = state.joint_position.into();
            next.motion_group = state.motion_group;
            next.controller = state.controller;
            next.tcp = state.tcp;
            next.standstill = state.standstill;
        }
        if pose_changed {
            next.tcp_pose = candidate_pose;
        }

        self.current = Arc::new(next);
        self.tx.send_replace(self.current.clone());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(seq: u64, joints: &[f64], pose: Option<Pose>) -> MotionGroupState {
        MotionGroupState {
            motion_group: "0@mock-ur5e".to_string(),
            controller: "mock-ur5e".to_string(),
            sequence_number: seq,
            timestamp: DateTime::from_timestamp(1_700_000_000 + seq as i64, 0).unwrap(),
            joint_position: joints.to_vec(),
            tcp_pose: pose,
            tcp: Some("Flange".to_string()),
            standstill: Some(true),
        }
    }

    fn pose(position: [f64; 3], orientation: [f64; 3]) -> Pose {
        Pose {
            position,
            orientation,
        }
    }

    const HOME: [f64; 6] = [1.1699, -1.57, 1.36, 1.03, 1.57, -1.57];

    #[test]
    fn joint_equality_requires_matching_lengths() {
        assert!(joint_values_equal(&[0.0, 1.0], &[0.00005, 1.0], 1e-4));
        assert!(!joint_values_equal(&[0.0, 1.0], &[0.0002, 1.0], 1e-4));
        assert!(!joint_values_equal(&[0.0, 1.0], &[0.0, 1.0, 2.0], 1e-4));
        assert!(joint_values_equal(&[], &[], 1e-4));
    }

    #[test]
    fn pose_equality_sums_components_and_tracks_presence() {
        let a = pose([0.0; 3], [0.0; 3]);
        // Each component below the threshold, but the sum above it.
        let b = pose([0.00004, 0.00004, 0.00004], [0.0; 3]);
        assert!(!tcp_pose_equal(Some(&a), Some(&b), 1e-4));
        let c = pose([0.00002, 0.0, 0.0], [0.0, 0.00002, 0.0]);
        assert!(tcp_pose_equal(Some(&a), Some(&c), 1e-4));
        assert!(!tcp_pose_equal(Some(&a), None, 1e-4));
        assert!(!tcp_pose_equal(None, Some(&a), 1e-4));
        assert!(tcp_pose_equal(None, None, 1e-4));
    }

    #[test]
    fn noise_below_threshold_is_suppressed() {
        let mut reconciler = MotionStateReconciler::new(state(1, &HOME, None), TelemetryCodec::JointArray);
        let before = reconciler.snapshot();

        let mut noisy = HOME;
        noisy[2] += 0.00005;
        let outcome = reconciler.apply(state(2, &noisy, None));

        assert!(!outcome.changed());
        let after = reconciler.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.sequence_number, 1);
    }

    #[test]
    fn joint_change_replaces_joint_field_and_scalars() {
        let mut reconciler = MotionStateReconciler::new(state(1, &HOME, None), TelemetryCodec::JointArray);

        let mut moved = HOME;
        moved[0] += 0.01;
        let mut next = state(2, &moved, None);
        next.standstill = Some(false);
        let outcome = reconciler.apply(next);

        assert!(outcome.joints_changed);
        assert!(!outcome.pose_changed);
        let snap = reconciler.snapshot();
        assert_eq!(&*snap.joint_position, &moved[..]);
        assert_eq!(snap.standstill, Some(false));
        assert_eq!(snap.sequence_number, 2);
    }

    #[test]
    fn joint_count_change_is_a_change() {
        let mut reconciler = MotionStateReconciler::new(state(1, &HOME, None), TelemetryCodec::JointArray);
        let outcome = reconciler.apply(state(2, &HOME[..5], None));
        assert!(outcome.joints_changed);
        assert_eq!(reconciler.snapshot().joint_position.len(), 5);
    }

    #[test]
    fn pose_updates_independently_of_joints() {
        let initial = pose([100.0, 0.0, 0.0], [0.0, 0.0, 1.0]);
        let mut reconciler =
            MotionStateReconciler::new(state(1, &HOME, Some(initial)), TelemetryCodec::JointArray);
        let joints_before = reconciler.snapshot().joint_position.clone();

        let moved = pose([101.0, 0.0, 0.0], [0.0, 0.0, 1.0]);
        let outcome = reconciler.apply(state(2, &HOME, Some(moved)));

        assert!(!outcome.joints_changed);
        assert!(outcome.pose_changed);
        let snap = reconciler.snapshot();
        assert!(Arc::ptr_eq(&joints_before, &snap.joint_position));
        assert_eq!(snap.tcp_pose.unwrap().position, [101.0, 0.0, 0.0]);
    }

    #[test]
    fn pose_disappearing_and_reappearing_are_changes() {
        let p = pose([1.0, 2.0, 3.0], [0.0, 0.0, 0.5]);
        let mut reconciler = MotionStateReconciler::new(state(1, &HOME, Some(p)), TelemetryCodec::JointArray);

        assert!(reconciler.apply(state(2, &HOME, None)).pose_changed);
        assert!(reconciler.snapshot().tcp_pose.is_none());

        // No previous pose: stored raw.
        let raw = pose([1.0, 2.0, 3.0], [-3.2, 0.0, 0.0]);
        assert!(reconciler.apply(state(3, &HOME, Some(raw))).pose_changed);
        assert_eq!(reconciler.snapshot().tcp_pose, Some(raw));
    }

    #[test]
    fn accepted_orientation_is_unwrapped() {
        let first = pose([0.0; 3], [3.0, 0.0, 0.0]);
        let mut reconciler =
            MotionStateReconciler::new(state(1, &HOME, Some(first)), TelemetryCodec::JointArray);

        let flipped = pose([0.0; 3], [-3.2, 0.0, 0.0]);
        assert!(reconciler.apply(state(2, &HOME, Some(flipped))).pose_changed);

        let stored = reconciler.snapshot().tcp_pose.unwrap().orientation;
        assert!((stored[0] - 3.083).abs() < 1e-3, "got {stored:?}");
        assert_eq!(stored[1], 0.0);
        assert_eq!(stored[2], 0.0);

        // The same raw frame again is not a change once unwrapped.
        assert!(!reconciler.apply(state(3, &HOME, Some(flipped))).changed());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn subscribers_wake_only_on_accepted_changes() {
        let mut reconciler = MotionStateReconciler::new(state(1, &HOME, None), TelemetryCodec::JointArray);
        let mut rx = reconciler.subscribe();
        assert!(!rx.has_changed().unwrap());

        reconciler.apply(state(2, &HOME, None));
        assert!(!rx.has_changed().unwrap());

        let mut moved = HOME;
        moved[5] += 0.5;
        reconciler.apply(state(3, &moved, None));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().joint_position[5], moved[5]);
    }

    #[test]
    fn apply_frame_propagates_parse_errors_without_mutation() {
        let mut reconciler = MotionStateReconciler::new(state(1, &HOME, None), TelemetryCodec::JointArray);
        let before = reconciler.snapshot();
        let err = reconciler.apply_frame("{\"result\": 42}").unwrap_err();
        assert!(matches!(err, ArmError::Parse(_)));
        assert!(Arc::ptr_eq(&before, &reconciler.snapshot()));
    }

    #[test]
    fn six_axis_stream_keeps_last_known_joints_until_real_motion() {
        let codec = TelemetryCodec::JointArray;
        let mut reconciler = MotionStateReconciler::new(state(1, &HOME, None), codec);

        let mut joints = HOME;
        let mut published = 0;
        for seq in 2..=20u64 {
            // Jitter well below the threshold.
            let jitter = if seq % 2 == 0 { 0.00003 } else { -0.00003 };
            let frame: Vec<f64> = joints.iter().map(|j| j + jitter).collect();
            let text = codec.encode(&state(seq, &frame, None));
            if reconciler.apply_frame(&text).unwrap().changed() {
                published += 1;
            }
        }
        assert_eq!(published, 0);
        assert_eq!(&*reconciler.snapshot().joint_position, &HOME[..]);

        joints[3] += 0.2;
        let text = codec.encode(&state(21, &joints, None));
        assert!(reconciler.apply_frame(&text).unwrap().joints_changed);
        let snap = reconciler.snapshot();
        assert_eq!(&*snap.joint_position, &joints[..]);
        assert_eq!(snap.sequence_number, 21);
    }
}
