//! Command channels.
//!
//! A [`CommandChannel`] carries start / stop instructions for one jogging
//! mode to the service.  The session owns exactly one channel and decides
//! when to call it; the channel only knows how to deliver.

use std::sync::Arc;

use armlink_stream::{Connector, ReconnectPolicy, ReconnectingStream, RestScope, WsConnector};
use armlink_types::{ArmError, JogCommand, JoggingMode};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::JoggingCodec;

#[async_trait]
pub trait CommandChannel: Send {
    /// (Re)initialise the channel for `mode`.  Called on every mode
    /// selection, including re-selecting the current mode.
    async fn open(&mut self, mode: JoggingMode) -> Result<(), ArmError>;

    /// Issue `command`; resolves once the service acknowledged it.
    async fn start(&mut self, mode: JoggingMode, command: &JogCommand) -> Result<(), ArmError>;

    /// Stop whatever motion `mode` is performing.
    async fn stop(&mut self, mode: JoggingMode) -> Result<(), ArmError>;

    /// Release the channel.  Motion stops service-side when the channel
    /// goes away.
    async fn close(&mut self);
}

#[async_trait]
impl<C: CommandChannel + ?Sized> CommandChannel for Box<C> {
    async fn open(&mut self, mode: JoggingMode) -> Result<(), ArmError> {
        (**self).open(mode).await
    }

    async fn start(&mut self, mode: JoggingMode, command: &JogCommand) -> Result<(), ArmError> {
        (**self).start(mode, command).await
    }

    async fn stop(&mut self, mode: JoggingMode) -> Result<(), ArmError> {
        (**self).stop(mode).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream channel
// ─────────────────────────────────────────────────────────────────────────────

/// Stream URLs per jogging mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoggingUrls {
    pub joint: String,
    pub cartesian: String,
}

impl JoggingUrls {
    pub fn for_mode(&self, mode: JoggingMode) -> Result<&str, ArmError> {
        match mode {
            JoggingMode::Joint => Ok(&self.joint),
            JoggingMode::Cartesian => Ok(&self.cartesian),
            JoggingMode::Disabled => Err(ArmError::JoggingDisabled),
        }
    }
}

type OpenHook = Arc<dyn Fn(&ReconnectingStream) + Send + Sync>;

/// Jogging over one [`ReconnectingStream`] per mode URL.
///
/// Selecting a mode closes the previous stream and opens the mode's URL.
pub struct StreamCommandChannel {
    urls: JoggingUrls,
    codec: JoggingCodec,
    joint_count: usize,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    on_open: Option<OpenHook>,
    stream: Option<(JoggingMode, ReconnectingStream)>,
    next_id: u64,
}

impl StreamCommandChannel {
    pub fn new(urls: JoggingUrls, codec: JoggingCodec, joint_count: usize) -> Self {
        Self {
            urls,
            codec,
            joint_count,
            connector: Arc::new(WsConnector),
            policy: ReconnectPolicy::default(),
            on_open: None,
            stream: None,
            next_id: 0,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        self.connector = connector;
        self.policy = policy;
        self
    }

    /// Call `hook` with every stream this channel opens, so an owner can
    /// close them on teardown.
    pub fn on_open(mut self, hook: impl Fn(&ReconnectingStream) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(hook));
        self
    }

    /// The stream currently in use, if any.
    pub fn stream(&self) -> Option<&ReconnectingStream> {
        self.stream.as_ref().map(|(_, stream)| stream)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// An open stream for `mode`.  A closed or foreign stream is replaced;
    /// a reconnecting one is waited for.
    async fn stream_for(&mut self, mode: JoggingMode) -> Result<ReconnectingStream, ArmError> {
        if let Some((current, stream)) = &self.stream
            && *current == mode
            && !stream.is_closed()
        {
            let stream = stream.clone();
            stream.wait_open().await?;
            return Ok(stream);
        }
        self.open(mode).await?;
        self.stream
            .as_ref()
            .map(|(_, stream)| stream.clone())
            .ok_or(ArmError::Closed)
    }

    /// Write `frame` and, for echoing codecs, wait for the matching id.
    async fn round_trip(&self, stream: &ReconnectingStream, id: u64, frame: String) -> Result<(), ArmError> {
        // Listen before writing so a fast echo is not missed.
        let mut echoes = self.codec.awaits_echo().then(|| stream.listen());
        stream.send(frame).await?;
        let Some(listener) = echoes.as_mut() else {
            return Ok(());
        };
        while let Some(frame) = listener.recv().await {
            if let Some(result) = self.codec.parse_ack(&frame.data, id) {
                return result;
            }
        }
        Err(ArmError::Closed)
    }
}

#[async_trait]
impl CommandChannel for StreamCommandChannel {
    async fn open(&mut self, mode: JoggingMode) -> Result<(), ArmError> {
        let url = self.urls.for_mode(mode)?.to_string();
        if let Some((_, previous)) = self.stream.take() {
            previous.close();
        }
        info!(url = %url, %mode, "opening jogging stream");
        let stream = ReconnectingStream::open_with(url, Arc::clone(&self.connector), self.policy);
        if let Some(hook) = &self.on_open {
            hook(&stream);
        }
        self.stream = Some((mode, stream.clone()));
        stream.wait_open().await
    }

    async fn start(&mut self, mode: JoggingMode, command: &JogCommand) -> Result<(), ArmError> {
        let stream = self.stream_for(mode).await?;
        let id = self.next_id();
        let frame = self.codec.start_frame(mode, command, self.joint_count, id)?;
        debug!(id, axis = command.axis, velocity = command.velocity, "jog start");
        self.round_trip(&stream, id, frame).await
    }

    async fn stop(&mut self, mode: JoggingMode) -> Result<(), ArmError> {
        let stream = match &self.stream {
            Some((current, stream)) if *current == mode => stream.clone(),
            // No stream for this mode: nothing can be moving through it.
            _ => return Ok(()),
        };
        stream.wait_open().await?;
        let id = self.next_id();
        let frame = self.codec.stop_frame(mode, self.joint_count, id)?;
        debug!(id, "jog stop");
        self.round_trip(&stream, id, frame).await
    }

    async fn close(&mut self) {
        if let Some((mode, stream)) = self.stream.take() {
            info!(%mode, "closing jogging stream");
            stream.close();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// REST channel
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ModeBody {
    mode: JoggingMode,
}

#[derive(Serialize)]
struct StartBody<'a> {
    mode: JoggingMode,
    #[serde(flatten)]
    command: &'a JogCommand,
}

/// Jogging over request/response calls below a motion group's
/// `jogging` resource: `POST mode`, `POST start`, `POST stop`.  A 2xx answer
/// is the acknowledgement.
#[derive(Debug, Clone)]
pub struct RestCommandChannel {
    rest: RestScope,
}

impl RestCommandChannel {
    /// `rest` must be scoped to the motion group's jogging resource.
    pub fn new(rest: RestScope) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl CommandChannel for RestCommandChannel {
    async fn open(&mut self, mode: JoggingMode) -> Result<(), ArmError> {
        info!(%mode, "selecting jogging mode");
        self.rest.post("mode", &ModeBody { mode }).await
    }

    async fn start(&mut self, mode: JoggingMode, command: &JogCommand) -> Result<(), ArmError> {
        debug!(axis = command.axis, velocity = command.velocity, "jog start");
        self.rest.post("start", &StartBody { mode, command }).await
    }

    async fn stop(&mut self, mode: JoggingMode) -> Result<(), ArmError> {
        debug!("jog stop");
        self.rest.post("stop", &ModeBody { mode }).await
    }

    async fn close(&mut self) {
        let body = ModeBody {
            mode: JoggingMode::Disabled,
        };
        if let Err(e) = self.rest.post("mode", &body).await {
            warn!(error = %e, "failed to disable jogging");
        }
    }
}
