//! Jogging session state machine.
//!
//! ```text
//!            set_mode(Joint|Cartesian)            start(cmd)
//!  Disabled ─────────────────────────▶ Idle ───────────────────▶ Moving
//!     ▲                                  ▲  ◀─────────────────────  │
//!     │           set_mode(Disabled)     │        stop()            │
//!     └──────────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Every transition out of `Moving` sends exactly one stop instruction
//! before anything else reaches the channel.

use std::future::Future;
use std::time::Duration;

use armlink_types::{ArmError, JogCommand, JoggingMode};
use tracing::{info, warn};

use crate::channel::CommandChannel;
use crate::codec::validate_command;

/// Upper bound on every channel round trip.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

pub struct JoggingSession<C> {
    channel: C,
    mode: JoggingMode,
    active: Option<JogCommand>,
    joint_count: usize,
    ack_timeout: Duration,
}

impl<C: CommandChannel> JoggingSession<C> {
    /// A disabled session for a motion group with `joint_count` joints.
    pub fn new(channel: C, joint_count: usize) -> Self {
        Self {
            channel,
            mode: JoggingMode::Disabled,
            active: None,
            joint_count,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn mode(&self) -> JoggingMode {
        self.mode
    }

    /// The command currently moving the robot, if any.
    pub fn active_command(&self) -> Option<&JogCommand> {
        self.active.as_ref()
    }

    pub fn is_moving(&self) -> bool {
        self.active.is_some()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Switch jogging mode.
    ///
    /// Any in-flight motion is stopped first.  `Disabled` closes the channel;
    /// any other mode (re)initialises it, even when it is already selected.
    /// If initialisation fails the session falls back to `Disabled`.
    pub async fn set_mode(&mut self, mode: JoggingMode) -> Result<(), ArmError> {
        self.stop().await?;

        if mode == JoggingMode::Disabled {
            self.channel.close().await;
            self.mode = JoggingMode::Disabled;
            info!("jogging disabled");
            return Ok(());
        }

        match within(self.ack_timeout, "mode selection", self.channel.open(mode)).await {
            Ok(()) => {
                info!(%mode, "jogging mode selected");
                self.mode = mode;
                Ok(())
            }
            Err(e) => {
                warn!(%mode, error = %e, "jogging mode selection failed");
                self.channel.close().await;
                self.mode = JoggingMode::Disabled;
                Err(e)
            }
        }
    }

    /// Start moving.
    ///
    /// An active command is stopped before the new one is sent.  Resolves
    /// once the channel acknowledged the command; on failure the session is
    /// left not moving.
    ///
    /// # Errors
    ///
    /// * [`ArmError::JoggingDisabled`] – mode is `Disabled`.
    /// * [`ArmError::InvalidArgument`] – velocity or axis out of range.
    /// * [`ArmError::Timeout`] – no acknowledgement within the ack timeout.
    /// * Channel errors as reported.
    pub async fn start(&mut self, command: JogCommand) -> Result<(), ArmError> {
        validate_command(self.mode, &command, self.joint_count)?;
        self.stop().await?;

        match within(self.ack_timeout, "jog start", self.channel.start(self.mode, &command)).await {
            Ok(()) => {
                info!(
                    mode = %self.mode,
                    axis = command.axis,
                    direction = ?command.direction,
                    velocity = command.velocity,
                    "jogging"
                );
                self.active = Some(command);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "jog start failed");
                Err(e)
            }
        }
    }

    /// Stop the active command.  A no-op when nothing is moving.
    pub async fn stop(&mut self) -> Result<(), ArmError> {
        if self.active.take().is_none() {
            return Ok(());
        }
        info!(mode = %self.mode, "stopping jog");
        within(self.ack_timeout, "jog stop", self.channel.stop(self.mode)).await
    }

    /// Stop and release the channel.  The session ends up disabled.
    pub async fn close(&mut self) {
        if let Err(e) = self.stop().await {
            warn!(error = %e, "stop on close failed");
        }
        self.channel.close().await;
        self.mode = JoggingMode::Disabled;
    }
}

async fn within<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, ArmError>>,
) -> Result<T, ArmError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ArmError::Timeout(format!("{what} not acknowledged within {limit:?}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use armlink_types::Direction;
    use async_trait::async_trait;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Open(JoggingMode),
        Start(JoggingMode, usize),
        Stop(JoggingMode),
        Close,
    }

    /// Records every call; `fail_start` / `hang_start` make the next starts
    /// misbehave.
    #[derive(Clone, Default)]
    struct RecordingChannel {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_start: Arc<Mutex<bool>>,
        hang_start: Arc<Mutex<bool>>,
        fail_open: Arc<Mutex<bool>>,
    }

    impl RecordingChannel {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl CommandChannel for RecordingChannel {
        async fn open(&mut self, mode: JoggingMode) -> Result<(), ArmError> {
            self.record(Call::Open(mode));
            if *self.fail_open.lock().unwrap() {
                return Err(ArmError::Transport("refused".into()));
            }
            Ok(())
        }

        async fn start(&mut self, mode: JoggingMode, command: &JogCommand) -> Result<(), ArmError> {
            self.record(Call::Start(mode, command.axis));
            if *self.hang_start.lock().unwrap() {
                std::future::pending::<()>().await;
            }
            if *self.fail_start.lock().unwrap() {
                return Err(ArmError::Command("rejected".into()));
            }
            Ok(())
        }

        async fn stop(&mut self, mode: JoggingMode) -> Result<(), ArmError> {
            self.record(Call::Stop(mode));
            Ok(())
        }

        async fn close(&mut self) {
            self.record(Call::Close);
        }
    }

    fn jog(axis: usize) -> JogCommand {
        JogCommand {
            axis,
            direction: Direction::Positive,
            velocity: 0.1,
        }
    }

    async fn joint_session() -> (JoggingSession<RecordingChannel>, RecordingChannel) {
        let channel = RecordingChannel::default();
        let mut session = JoggingSession::new(channel.clone(), 6);
        session.set_mode(JoggingMode::Joint).await.unwrap();
        channel.clear();
        (session, channel)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn start_in_disabled_mode_is_rejected() {
        let channel = RecordingChannel::default();
        let mut session = JoggingSession::new(channel.clone(), 6);
        assert_eq!(session.start(jog(0)).await, Err(ArmError::JoggingDisabled));
        assert!(channel.calls().is_empty());
        assert!(!session.is_moving());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invalid_commands_never_reach_the_channel() {
        let (mut session, channel) = joint_session().await;
        let mut bad = jog(0);
        bad.velocity = -1.0;
        assert!(matches!(session.start(bad).await, Err(ArmError::InvalidArgument(_))));
        assert!(matches!(session.start(jog(6)).await, Err(ArmError::InvalidArgument(_))));
        assert!(channel.calls().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_is_idempotent() {
        let (mut session, channel) = joint_session().await;
        session.start(jog(0)).await.unwrap();
        session.stop().await.unwrap();
        session.stop().await.unwrap();
        assert_eq!(
            channel.calls(),
            vec![Call::Start(JoggingMode::Joint, 0), Call::Stop(JoggingMode::Joint)]
        );
        assert!(!session.is_moving());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_while_idle_sends_nothing() {
        let (mut session, channel) = joint_session().await;
        session.stop().await.unwrap();
        assert!(channel.calls().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn new_start_stops_the_active_command_first() {
        let (mut session, channel) = joint_session().await;
        session.start(jog(0)).await.unwrap();
        session.start(jog(3)).await.unwrap();
        assert_eq!(
            channel.calls(),
            vec![
                Call::Start(JoggingMode::Joint, 0),
                Call::Stop(JoggingMode::Joint),
                Call::Start(JoggingMode::Joint, 3),
            ]
        );
        assert_eq!(session.active_command().map(|c| c.axis), Some(3));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn mode_switch_stops_motion_before_switching() {
        let (mut session, channel) = joint_session().await;
        session.start(jog(1)).await.unwrap();
        session.set_mode(JoggingMode::Cartesian).await.unwrap();
        assert_eq!(
            channel.calls(),
            vec![
                Call::Start(JoggingMode::Joint, 1),
                Call::Stop(JoggingMode::Joint),
                Call::Open(JoggingMode::Cartesian),
            ]
        );
        assert_eq!(session.mode(), JoggingMode::Cartesian);
        assert!(!session.is_moving());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reselecting_the_mode_reinitialises_the_channel() {
        let (mut session, channel) = joint_session().await;
        session.set_mode(JoggingMode::Joint).await.unwrap();
        assert_eq!(channel.calls(), vec![Call::Open(JoggingMode::Joint)]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disabling_closes_the_channel() {
        let (mut session, channel) = joint_session().await;
        session.start(jog(2)).await.unwrap();
        session.set_mode(JoggingMode::Disabled).await.unwrap();
        assert_eq!(
            channel.calls(),
            vec![
                Call::Start(JoggingMode::Joint, 2),
                Call::Stop(JoggingMode::Joint),
                Call::Close,
            ]
        );
        assert_eq!(session.start(jog(0)).await, Err(ArmError::JoggingDisabled));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_start_leaves_the_session_idle() {
        let (mut session, channel) = joint_session().await;
        *channel.fail_start.lock().unwrap() = true;
        assert_eq!(
            session.start(jog(0)).await,
            Err(ArmError::Command("rejected".into()))
        );
        assert!(!session.is_moving());
        // Nothing is moving, so stop stays silent.
        channel.clear();
        session.stop().await.unwrap();
        assert!(channel.calls().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn unacknowledged_start_times_out() {
        let (session, channel) = joint_session().await;
        let mut session = session.with_ack_timeout(Duration::from_millis(100));
        *channel.hang_start.lock().unwrap() = true;
        let err = session.start(jog(0)).await.unwrap_err();
        assert!(matches!(err, ArmError::Timeout(_)), "{err:?}");
        assert!(!session.is_moving());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_mode_selection_falls_back_to_disabled() {
        let (mut session, channel) = joint_session().await;
        *channel.fail_open.lock().unwrap() = true;
        assert!(session.set_mode(JoggingMode::Cartesian).await.is_err());
        assert_eq!(session.mode(), JoggingMode::Disabled);
        assert_eq!(
            channel.calls(),
            vec![Call::Open(JoggingMode::Cartesian), Call::Close]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_stops_and_disables() {
        let (mut session, channel) = joint_session().await;
        session.start(jog(0)).await.unwrap();
        session.close().await;
        assert_eq!(
            channel.calls(),
            vec![
                Call::Start(JoggingMode::Joint, 0),
                Call::Stop(JoggingMode::Joint),
                Call::Close,
            ]
        );
        assert_eq!(session.mode(), JoggingMode::Disabled);
    }
}
