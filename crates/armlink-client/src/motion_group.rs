//! Connected motion group.
//!
//! [`ConnectedMotionGroup::connect`] resolves a motion group through the
//! [`MetadataSource`][crate::MetadataSource], waits for its first telemetry
//! frame, probes whether the controller is virtual, fetches static metadata
//! and then keeps a [`MotionStateReconciler`] fed from the telemetry stream
//! on a background task.  Readers observe the result through
//! [`snapshot`][ConnectedMotionGroup::snapshot] and
//! [`subscribe`][ConnectedMotionGroup::subscribe].

use std::sync::{Arc, Mutex, MutexGuard};

use armlink_jogging::{
    CommandChannel, JoggingSession, RestCommandChannel, StreamCommandChannel, degrees_to_radians,
};
use armlink_motion::{MotionStateReconciler, MotionStateSnapshot};
use armlink_stream::{FrameListener, ReconnectingStream};
use armlink_types::{
    ArmError, ControllerInfo, DhParameter, Direction, JogCommand, MotionGroupId,
    MotionGroupInfo, MotionGroupMetadata, MotionGroupState, RobotTcp, SafetyZone,
};
use futures_util::future::try_join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use crate::client::CellClient;
use crate::config::JoggingTransport;
use crate::metadata::MetadataSource;

/// Streams opened on behalf of the group.  `None` once disposed.
type StreamRegistry = Arc<Mutex<Option<Vec<ReconnectingStream>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct ConnectedMotionGroup {
    client: CellClient,
    id: MotionGroupId,
    metadata: MotionGroupMetadata,
    joint_count: usize,
    telemetry: ReconnectingStream,
    reconciler: Arc<Mutex<Option<MotionStateReconciler>>>,
    updates: watch::Receiver<Arc<MotionStateSnapshot>>,
    telemetry_error: Arc<Mutex<Option<ArmError>>>,
    jogging_streams: StreamRegistry,
    /// Degrees per second.
    jogging_velocity: f64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectedMotionGroup {
    /// Connect to `motion_group` (`"<index>@<controller>"`).
    ///
    /// # Errors
    ///
    /// * [`ArmError::InvalidArgument`] – malformed id.
    /// * [`ArmError::NotFound`] – unknown controller or motion group.
    /// * [`ArmError::Timeout`] – no telemetry within the connect timeout.
    /// * [`ArmError::Parse`] – the first telemetry frame is malformed.
    /// * Metadata errors other than the virtual-probe rejection.
    ///
    /// The telemetry stream is closed again on every error.
    pub async fn connect(client: &CellClient, motion_group: &str) -> Result<Self, ArmError> {
        let id: MotionGroupId = motion_group.parse()?;
        let group_key = id.to_string();
        let source = client.metadata();

        let (controller, group) = resolve(source.controllers().await?, &id)?;

        let telemetry = client.open_stream(&CellClient::telemetry_path(&id.controller, &group_key))?;
        // Subscribe before the first frame so nothing falls between the
        // initial state and the background task.
        let listener = telemetry.listen();

        let config = client.config();
        let codec = config.telemetry_schema;
        let setup = async {
            let first = tokio::time::timeout(config.connect_timeout(), telemetry.first_message())
                .await
                .map_err(|_| {
                    ArmError::Timeout(format!(
                        "no telemetry from {group_key} within {:?}",
                        config.connect_timeout()
                    ))
                })??;
            let initial = codec.decode(&first.data)?;

            let is_virtual = probe_virtual(source.as_ref(), &id.controller).await?;

            let (tcps, kinematics, safety_zones) = tokio::try_join!(
                source.tcps(&id.controller, &group_key),
                source.kinematics(&id.controller, &group_key),
                source.safety_zones(&id.controller, &group_key),
            )?;

            let metadata = MotionGroupMetadata {
                controller: controller.clone(),
                motion_group: group.clone(),
                kinematics,
                tcps,
                safety_zones,
                is_virtual,
            };
            Ok::<_, ArmError>((initial, metadata))
        };

        let (initial, metadata) = match setup.await {
            Ok(parts) => parts,
            Err(e) => {
                warn!(motion_group = %group_key, error = %e, "connect failed");
                telemetry.close();
                return Err(e);
            }
        };

        let reconciler = MotionStateReconciler::new(initial, codec)
            .with_threshold(config.motion_delta_threshold);
        let updates = reconciler.subscribe();
        let joint_count = reconciler.snapshot().joint_position.len();
        let reconciler = Arc::new(Mutex::new(Some(reconciler)));
        let telemetry_error = Arc::new(Mutex::new(None));

        let task = tokio::spawn(drive(
            id.clone(),
            listener,
            telemetry.clone(),
            Arc::clone(&reconciler),
            Arc::clone(&telemetry_error),
        ));

        info!(
            motion_group = %group_key,
            is_virtual = metadata.is_virtual,
            joints = joint_count,
            tcps = metadata.tcps.len(),
            "motion group connected"
        );

        Ok(Self {
            client: client.clone(),
            id,
            metadata,
            joint_count,
            telemetry,
            reconciler,
            updates,
            telemetry_error,
            jogging_streams: Arc::new(Mutex::new(Some(Vec::new()))),
            jogging_velocity: config.jogging_velocity,
            task: Mutex::new(Some(task)),
        })
    }

    /// Connect to several motion groups concurrently.  Fails as a whole if
    /// any one of them fails; groups connected so far are disposed.
    pub async fn connect_many(client: &CellClient, motion_groups: &[&str]) -> Result<Vec<Self>, ArmError> {
        try_join_all(motion_groups.iter().map(|id| Self::connect(client, id))).await
    }

    // ── Identity ─────────────────────────────────────────────────────────

    pub fn id(&self) -> &MotionGroupId {
        &self.id
    }

    pub fn motion_group_id(&self) -> &str {
        &self.metadata.motion_group.motion_group
    }

    pub fn controller_id(&self) -> &str {
        &self.metadata.controller.controller
    }

    pub fn model_from_controller(&self) -> Option<&str> {
        self.metadata.motion_group.model_from_controller.as_deref()
    }

    /// Identifier used for the group in robot programs:
    /// `<controller with '-' → '_'>_<index>`.
    pub fn script_identifier(&self) -> String {
        format!("{}_{}", self.id.controller.replace('-', "_"), self.id.index)
    }

    // ── Static metadata ──────────────────────────────────────────────────

    pub fn metadata(&self) -> &MotionGroupMetadata {
        &self.metadata
    }

    pub fn is_virtual(&self) -> bool {
        self.metadata.is_virtual
    }

    pub fn tcps(&self) -> &[RobotTcp] {
        &self.metadata.tcps
    }

    pub fn dh_parameters(&self) -> &[DhParameter] {
        &self.metadata.kinematics.dh_parameters
    }

    pub fn safety_zones(&self) -> &[SafetyZone] {
        &self.metadata.safety_zones
    }

    /// Number of joints reported by the first telemetry frame.
    pub fn joint_count(&self) -> usize {
        self.joint_count
    }

    // ── Live state ───────────────────────────────────────────────────────

    /// The latest reconciled state.  Still readable after
    /// [`dispose`][Self::dispose]; it just stops changing.
    pub fn snapshot(&self) -> Arc<MotionStateSnapshot> {
        self.updates.borrow().clone()
    }

    /// Receiver that wakes whenever an update passed the change threshold.
    /// Ends (`changed()` errors) once the group is disposed.
    pub fn subscribe(&self) -> watch::Receiver<Arc<MotionStateSnapshot>> {
        match lock(&self.reconciler).as_ref() {
            Some(reconciler) => reconciler.subscribe(),
            None => self.updates.clone(),
        }
    }

    /// The telemetry stream, e.g. to watch its connection state.
    pub fn telemetry_stream(&self) -> &ReconnectingStream {
        &self.telemetry
    }

    /// The error that stopped telemetry processing, if any.
    pub fn telemetry_error(&self) -> Option<ArmError> {
        lock(&self.telemetry_error).clone()
    }

    // ── Jogging ──────────────────────────────────────────────────────────

    /// Default jogging velocity in degrees per second.
    pub fn jogging_velocity(&self) -> f64 {
        self.jogging_velocity
    }

    /// Default jogging velocity in radians per second.
    pub fn jogging_velocity_rads(&self) -> f64 {
        degrees_to_radians(self.jogging_velocity)
    }

    pub fn set_jogging_velocity(&mut self, degrees_per_second: f64) -> Result<(), ArmError> {
        if !degrees_per_second.is_finite() || degrees_per_second < 0.0 {
            return Err(ArmError::InvalidArgument(format!(
                "jogging velocity must be a non-negative number, got {degrees_per_second}"
            )));
        }
        self.jogging_velocity = degrees_per_second;
        Ok(())
    }

    /// A joint jog of `axis` at the default jogging velocity.
    pub fn joint_jog(&self, axis: usize, direction: Direction) -> JogCommand {
        JogCommand {
            axis,
            direction,
            velocity: self.jogging_velocity_rads(),
        }
    }

    /// A disabled jogging session for this group over the configured
    /// transport.  Streams it opens are closed by [`dispose`][Self::dispose].
    pub fn jogging_session(&self) -> Result<JoggingSession<Box<dyn CommandChannel>>, ArmError> {
        if lock(&self.jogging_streams).is_none() {
            return Err(ArmError::Closed);
        }
        let config = self.client.config();
        let group = self.motion_group_id();
        let channel: Box<dyn CommandChannel> = match config.jogging_transport {
            JoggingTransport::Stream => {
                let registry = Arc::clone(&self.jogging_streams);
                Box::new(
                    StreamCommandChannel::new(
                        self.client.jogging_urls(group)?,
                        config.jogging_codec,
                        self.joint_count,
                    )
                    .with_connector(self.client.connector(), self.client.reconnect_policy())
                    .on_open(move |stream| match lock(&registry).as_mut() {
                        Some(streams) => {
                            streams.retain(|s| !s.is_closed());
                            streams.push(stream.clone());
                        }
                        None => stream.close(),
                    }),
                )
            }
            JoggingTransport::Rest => Box::new(RestCommandChannel::new(self.client.jogging_rest(group)?)),
        };
        Ok(JoggingSession::new(channel, self.joint_count).with_ack_timeout(config.ack_timeout()))
    }

    // ── Teardown ─────────────────────────────────────────────────────────

    pub fn is_disposed(&self) -> bool {
        lock(&self.jogging_streams).is_none()
    }

    /// Close every stream the group owns and stop processing telemetry.
    ///
    /// Idempotent.  Once this returns the snapshot no longer changes.
    pub fn dispose(&self) {
        let Some(streams) = lock(&self.jogging_streams).take() else {
            return;
        };
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        lock(&self.reconciler).take();
        self.telemetry.close();
        for stream in streams {
            stream.close();
        }
        info!(motion_group = %self.id, "motion group disposed");
    }
}

impl Drop for ConnectedMotionGroup {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ConnectedMotionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedMotionGroup")
            .field("id", &self.id.to_string())
            .field("is_virtual", &self.metadata.is_virtual)
            .field("joint_count", &self.joint_count)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

fn resolve(
    controllers: Vec<ControllerInfo>,
    id: &MotionGroupId,
) -> Result<(ControllerInfo, MotionGroupInfo), ArmError> {
    let controller = controllers
        .into_iter()
        .find(|c| c.controller == id.controller)
        .ok_or_else(|| ArmError::NotFound {
            kind: "controller".to_string(),
            id: id.controller.clone(),
        })?;
    let key = id.to_string();
    let group = controller
        .motion_groups
        .iter()
        .find(|g| g.motion_group == key)
        .cloned()
        .ok_or_else(|| ArmError::NotFound {
            kind: "motion group".to_string(),
            id: key,
        })?;
    Ok((controller, group))
}

/// A service-level rejection of the probe means "physical"; anything else
/// (connection refused, garbage body) is a real failure.
async fn probe_virtual(source: &dyn MetadataSource, controller: &str) -> Result<bool, ArmError> {
    match source.virtual_operation_mode(controller).await {
        Ok(mode) => Ok(mode.is_some()),
        Err(e) if e.is_service_response() => {
            info!(controller, reason = %e, "virtual probe rejected; controller is physical");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// `true` when a frame names a different motion group or controller.
/// Empty ids are not checked.
fn misrouted(expected: &MotionGroupId, state: &MotionGroupState) -> bool {
    let group_differs = !state.motion_group.is_empty() && state.motion_group != expected.to_string();
    let controller_differs = !state.controller.is_empty() && state.controller != expected.controller;
    group_differs || controller_differs
}

/// Feed telemetry frames into the reconciler until the stream ends, the
/// group is disposed, or a frame fails to decode.  Frames for another
/// motion group are dropped.
async fn drive(
    expected: MotionGroupId,
    mut listener: FrameListener,
    telemetry: ReconnectingStream,
    reconciler: Arc<Mutex<Option<MotionStateReconciler>>>,
    error_slot: Arc<Mutex<Option<ArmError>>>,
) {
    while let Some(frame) = listener.recv().await {
        let applied = match lock(&reconciler).as_mut() {
            Some(reconciler) => match reconciler.codec().decode(&frame.data) {
                Ok(state) if misrouted(&expected, &state) => {
                    warn!(
                        expected = %expected,
                        motion_group = %state.motion_group,
                        controller = %state.controller,
                        "dropping telemetry frame for another motion group"
                    );
                    continue;
                }
                Ok(state) => Ok(reconciler.apply(state)),
                Err(e) => Err(e),
            },
            None => return,
        };
        match applied {
            Ok(outcome) if outcome.changed() => trace!(
                generation = frame.generation,
                joints = outcome.joints_changed,
                pose = outcome.pose_changed,
                "motion state updated"
            ),
            Ok(_) => {}
            Err(e) => {
                error!(url = %telemetry.url(), error = %e, "telemetry frame rejected; closing stream");
                *lock(&error_slot) = Some(e);
                telemetry.close();
                return;
            }
        }
    }
}
