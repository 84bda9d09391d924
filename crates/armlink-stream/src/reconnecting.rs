//! [`ReconnectingStream`] – one logical duplex connection that survives
//! transport drops.
//!
//! A single supervisor task owns the live [`Transport`].  Handles talk to it
//! through a control channel and share the waiter / listener bookkeeping
//! behind a mutex, so frame delivery is strictly FIFO and never concurrent.
//!
//! Every adopted transport, and every URL change, bumps a generation
//! counter.  Frames stamped with an older generation are discarded, which is
//! what guarantees that a superseded transport can never feed a waiter.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use armlink_types::{ArmError, ConnectionState};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::transport::{Connector, Transport};
use crate::ws::WsConnector;

/// A text frame received on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw frame payload.
    pub data: String,
    /// Generation of the transport that delivered the frame.  Strictly
    /// greater after every reconnect or URL change.
    pub generation: u64,
}

/// Handle to a reconnecting stream.  Clones share the same connection.
///
/// # Example
///
/// ```rust,no_run
/// use armlink_stream::ReconnectingStream;
///
/// # async fn demo() -> Result<(), armlink_types::ArmError> {
/// let stream = ReconnectingStream::open("ws://localhost:8080/state-stream");
/// let first = stream.first_message().await?;
/// println!("{}", first.data);
/// stream.close();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ReconnectingStream {
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Control>,
}

struct Shared {
    inner: Mutex<Inner>,
    state: watch::Sender<ConnectionState>,
}

struct Inner {
    url: String,
    generation: u64,
    closed: bool,
    first_frame: Option<Frame>,
    first_waiters: Vec<oneshot::Sender<Frame>>,
    next_waiters: VecDeque<oneshot::Sender<Frame>>,
    listeners: Vec<mpsc::UnboundedSender<Frame>>,
}

enum Control {
    UrlChanged,
    Close,
    Send {
        text: String,
        ack: oneshot::Sender<Result<(), ArmError>>,
    },
}

/// Receives every accepted frame, in arrival order, exactly once.
///
/// Obtained via [`ReconnectingStream::listen`].
pub struct FrameListener {
    receiver: mpsc::UnboundedReceiver<Frame>,
}

impl FrameListener {
    /// Wait for the next frame.  Returns `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }
}

impl ReconnectingStream {
    /// Open a WebSocket stream to `url` with the default
    /// [`ReconnectPolicy`].
    ///
    /// Returns immediately; connecting happens on a spawned task, so this
    /// must be called from within a Tokio runtime.
    pub fn open(url: impl Into<String>) -> Self {
        Self::open_with(url, Arc::new(WsConnector), ReconnectPolicy::default())
    }

    /// Open a stream to `url` using an explicit connector and policy.
    pub fn open_with(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> Self {
        let url = url.into();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                url: url.clone(),
                generation: 0,
                closed: false,
                first_frame: None,
                first_waiters: Vec::new(),
                next_waiters: VecDeque::new(),
                listeners: Vec::new(),
            }),
            state,
        });
        let (control, control_rx) = mpsc::unbounded_channel();
        info!(url = %url, "opening stream");
        tokio::spawn(supervise(Arc::clone(&shared), connector, policy, control_rx));
        Self { shared, control }
    }

    /// The URL the stream currently targets.
    pub fn url(&self) -> String {
        self.shared.lock().url.clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// `true` once [`close`][Self::close] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Resolve with the first frame received on the current transport.
    ///
    /// If that frame has already arrived it is returned straight away;
    /// otherwise the call waits for it.  A reconnect or
    /// [`change_url`][Self::change_url] resets the cached frame.
    ///
    /// # Errors
    ///
    /// [`ArmError::Closed`] if the stream is closed before a frame arrives.
    pub fn first_message(&self) -> impl Future<Output = Result<Frame, ArmError>> + Send + 'static {
        let waiter = {
            let mut inner = self.shared.lock();
            if inner.closed {
                Err(ArmError::Closed)
            } else if let Some(frame) = &inner.first_frame {
                Ok(Ok(frame.clone()))
            } else {
                let (tx, rx) = oneshot::channel();
                inner.first_waiters.push(tx);
                Ok(Err(rx))
            }
        };
        async move {
            match waiter? {
                Ok(frame) => Ok(frame),
                Err(rx) => rx.await.map_err(|_| ArmError::Closed),
            }
        }
    }

    /// Resolve with the next frame received after this call.
    ///
    /// The waiter is registered synchronously, so a frame arriving between
    /// this call and the first poll of the returned future is not missed.
    ///
    /// # Errors
    ///
    /// [`ArmError::Closed`] if the stream is closed first.
    pub fn next_message(&self) -> impl Future<Output = Result<Frame, ArmError>> + Send + 'static {
        let waiter = {
            let mut inner = self.shared.lock();
            if inner.closed {
                Err(ArmError::Closed)
            } else {
                let (tx, rx) = oneshot::channel();
                inner.next_waiters.push_back(tx);
                Ok(rx)
            }
        };
        async move { waiter?.await.map_err(|_| ArmError::Closed) }
    }

    /// Subscribe to every frame accepted from now on.
    pub fn listen(&self) -> FrameListener {
        let (tx, receiver) = mpsc::unbounded_channel();
        let mut inner = self.shared.lock();
        // A closed stream returns a listener that ends immediately.
        if !inner.closed {
            inner.listeners.push(tx);
        }
        FrameListener { receiver }
    }

    /// Point the stream at a new URL.
    ///
    /// The current transport is superseded immediately: none of its frames
    /// are delivered after this call returns.  Waiters registered earlier
    /// stay registered and resolve with frames from the new URL.
    pub fn change_url(&self, url: impl Into<String>) {
        let url = url.into();
        {
            let mut inner = self.shared.lock();
            if inner.closed {
                return;
            }
            info!(from = %inner.url, to = %url, "changing stream url");
            inner.url = url;
            inner.generation += 1;
            inner.first_frame = None;
            self.shared.state.send_replace(ConnectionState::Connecting);
        }
        let _ = self.control.send(Control::UrlChanged);
    }

    /// Write a text frame on the live transport.
    ///
    /// # Errors
    ///
    /// * [`ArmError::Closed`] – the stream has been closed.
    /// * [`ArmError::Transport`] – no transport is currently open, or the
    ///   write failed.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ArmError> {
        if self.is_closed() {
            return Err(ArmError::Closed);
        }
        let (ack, rx) = oneshot::channel();
        self.control
            .send(Control::Send {
                text: text.into(),
                ack,
            })
            .map_err(|_| ArmError::Closed)?;
        rx.await.map_err(|_| ArmError::Closed)?
    }

    /// Wait until a transport is open.
    ///
    /// # Errors
    ///
    /// [`ArmError::Closed`] if the stream is (or becomes) closed.
    pub async fn wait_open(&self) -> Result<(), ArmError> {
        let mut rx = self.shared.state.subscribe();
        let state = rx
            .wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::Closed))
            .await
            .map_err(|_| ArmError::Closed)?;
        match *state {
            ConnectionState::Open => Ok(()),
            _ => Err(ArmError::Closed),
        }
    }

    /// Terminate the stream.
    ///
    /// No reconnect is attempted afterwards, pending waiters fail with
    /// [`ArmError::Closed`] and listeners end.  Safe to call repeatedly and
    /// from any state; no frame is delivered once this returns.
    pub fn close(&self) {
        {
            let mut inner = self.shared.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.first_frame = None;
            inner.first_waiters.clear();
            inner.next_waiters.clear();
            inner.listeners.clear();
            self.shared.state.send_replace(ConnectionState::Closed);
            info!(url = %inner.url, "closing stream");
        }
        let _ = self.control.send(Control::Close);
    }
}

// ---------------------------------------------------------------------------
// Shared bookkeeping
// ---------------------------------------------------------------------------

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Recover from poisoning.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// URL to connect to next, or `None` once closed.
    fn target(&self) -> Option<String> {
        let inner = self.lock();
        (!inner.closed).then(|| inner.url.clone())
    }

    fn is_current_url(&self, url: &str) -> bool {
        self.lock().url == url
    }

    /// Make a freshly connected transport the live one.  Returns its
    /// generation, or `None` if the stream was closed or re-targeted while
    /// connecting.
    fn adopt(&self, url: &str) -> Option<u64> {
        let mut inner = self.lock();
        if inner.closed || inner.url != url {
            return None;
        }
        inner.generation += 1;
        inner.first_frame = None;
        self.state.send_replace(ConnectionState::Open);
        Some(inner.generation)
    }

    fn deliver(&self, generation: u64, data: String) {
        let mut inner = self.lock();
        if inner.closed || inner.generation != generation {
            debug!(generation, current = inner.generation, "discarding frame from superseded transport");
            return;
        }
        let frame = Frame { data, generation };
        if inner.first_frame.is_none() {
            inner.first_frame = Some(frame.clone());
            for waiter in inner.first_waiters.drain(..) {
                let _ = waiter.send(frame.clone());
            }
        }
        for waiter in inner.next_waiters.drain(..) {
            let _ = waiter.send(frame.clone());
        }
        inner.listeners.retain(|listener| listener.send(frame.clone()).is_ok());
    }

    /// The live transport is gone: forget its first frame so
    /// `first_message` waits for the next transport.
    fn detach(&self) {
        let mut inner = self.lock();
        inner.first_frame = None;
        if !inner.closed {
            self.state.send_replace(ConnectionState::Reconnecting);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let inner = self.lock();
        if !inner.closed {
            self.state.send_replace(state);
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor task
// ---------------------------------------------------------------------------

enum Exit {
    Closed,
    UrlChanged,
    Dropped(String),
}

async fn supervise(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let mut attempt: u32 = 0;
    let mut reconnecting = false;

    while let Some(url) = shared.target() {
        shared.set_state(if reconnecting {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let result = {
            let mut connect = connector.connect(&url);
            loop {
                tokio::select! {
                    result = &mut connect => break Some(result),
                    cmd = control.recv() => match cmd {
                        None | Some(Control::Close) => return,
                        // Already dialling the current URL.
                        Some(Control::UrlChanged) if shared.is_current_url(&url) => {}
                        Some(Control::UrlChanged) => break None,
                        Some(Control::Send { ack, .. }) => {
                            let _ = ack.send(Err(ArmError::Transport("stream is not connected".to_string())));
                        }
                    },
                }
            }
        };

        let transport = match result {
            None => {
                attempt = 0;
                reconnecting = false;
                continue;
            }
            Some(Err(e)) => {
                let delay = policy.delay_for(attempt);
                warn!(url = %url, error = %e, attempt, delay_ms = delay.as_millis() as u64, "stream connect failed");
                attempt = attempt.saturating_add(1);
                reconnecting = true;
                if !pause(delay, &mut control).await {
                    return;
                }
                continue;
            }
            Some(Ok(transport)) => transport,
        };

        let Some(generation) = shared.adopt(&url) else {
            let mut transport = transport;
            transport.close().await;
            continue;
        };
        info!(url = %url, generation, "stream open");
        attempt = 0;

        match run_transport(&shared, &url, transport, generation, &mut control).await {
            Exit::Closed => return,
            Exit::UrlChanged => reconnecting = false,
            Exit::Dropped(reason) => {
                let delay = policy.delay_for(attempt);
                warn!(url = %url, reason = %reason, delay_ms = delay.as_millis() as u64, "stream dropped, reconnecting");
                attempt = attempt.saturating_add(1);
                reconnecting = true;
                shared.detach();
                if !pause(delay, &mut control).await {
                    return;
                }
            }
        }
    }
}

/// Pump one transport until it drops, the URL changes, or the stream closes.
async fn run_transport(
    shared: &Shared,
    url: &str,
    mut transport: Box<dyn Transport>,
    generation: u64,
    control: &mut mpsc::UnboundedReceiver<Control>,
) -> Exit {
    loop {
        tokio::select! {
            frame = transport.recv() => match frame {
                Some(Ok(data)) => shared.deliver(generation, data),
                Some(Err(e)) => {
                    transport.close().await;
                    return Exit::Dropped(e.to_string());
                }
                None => return Exit::Dropped("closed by peer".to_string()),
            },
            cmd = control.recv() => match cmd {
                None | Some(Control::Close) => {
                    transport.close().await;
                    return Exit::Closed;
                }
                Some(Control::UrlChanged) => {
                    // Adoption may already have picked up the new URL.
                    if shared.is_current_url(url) && shared.lock().generation == generation {
                        continue;
                    }
                    transport.close().await;
                    return Exit::UrlChanged;
                }
                Some(Control::Send { text, ack }) => {
                    let _ = ack.send(transport.send(text).await);
                }
            },
        }
    }
}

/// Sleep for `delay` while still honouring control messages.  Returns
/// `false` when the stream was closed.
async fn pause(delay: std::time::Duration, control: &mut mpsc::UnboundedReceiver<Control>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = control.recv() => match cmd {
                None | Some(Control::Close) => return false,
                Some(Control::UrlChanged) => return true,
                Some(Control::Send { ack, .. }) => {
                    let _ = ack.send(Err(ArmError::Transport("stream is reconnecting".to_string())));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnector, MemoryServer};
    use std::time::Duration;

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy::constant(Duration::from_millis(5))
    }

    fn memory_stream(url: &str) -> (ReconnectingStream, MemoryServer) {
        let (connector, server) = MemoryConnector::pair();
        let stream = ReconnectingStream::open_with(url, Arc::new(connector), fast_policy());
        (stream, server)
    }

    async fn within<T>(fut: impl Future<Output = T>) -> T {
        tokio::time::timeout(Duration::from_secs(2), fut)
            .await
            .expect("timed out")
    }

    #[tokio::test]
    async fn first_message_resolves_with_first_frame() {
        let (stream, mut server) = memory_stream("mem://state");
        let first = stream.first_message();
        let peer = within(server.accept()).await.unwrap();
        peer.send("one").unwrap();
        peer.send("two").unwrap();

        assert_eq!(within(first).await.unwrap().data, "one");
        // Already received: served from the cache.
        assert_eq!(within(stream.first_message()).await.unwrap().data, "one");
    }

    #[tokio::test]
    async fn next_message_always_waits_for_a_new_frame() {
        let (stream, mut server) = memory_stream("mem://state");
        let peer = within(server.accept()).await.unwrap();
        peer.send("one").unwrap();
        within(stream.first_message()).await.unwrap();

        let next = stream.next_message();
        peer.send("two").unwrap();
        assert_eq!(within(next).await.unwrap().data, "two");
    }

    #[tokio::test]
    async fn listeners_receive_every_frame_in_order() {
        let (stream, mut server) = memory_stream("mem://state");
        let mut listener = stream.listen();
        let peer = within(server.accept()).await.unwrap();
        for i in 0..50 {
            peer.send(i.to_string()).unwrap();
        }
        for i in 0..50 {
            assert_eq!(within(listener.recv()).await.unwrap().data, i.to_string());
        }
    }

    #[tokio::test]
    async fn reconnect_resumes_delivery_on_new_transport() {
        let (stream, mut server) = memory_stream("mem://state");
        let mut old_peer = within(server.accept()).await.unwrap();
        old_peer.send("old").unwrap();
        let old = within(stream.first_message()).await.unwrap();
        assert_eq!(old.data, "old");

        old_peer.disconnect();
        let new_peer = within(server.accept()).await.unwrap();
        assert_eq!(new_peer.url(), "mem://state");
        within(stream.wait_open()).await.unwrap();

        let first = stream.first_message();
        new_peer.send("new").unwrap();
        let frame = within(first).await.unwrap();
        assert_eq!(frame.data, "new");
        assert!(frame.generation > old.generation);
    }

    #[tokio::test]
    async fn first_message_during_backoff_waits_for_the_new_transport() {
        let (connector, mut server) = MemoryConnector::pair();
        let policy = ReconnectPolicy::constant(Duration::from_millis(300));
        let stream = ReconnectingStream::open_with("mem://state", Arc::new(connector), policy);
        let mut old_peer = within(server.accept()).await.unwrap();
        old_peer.send("old").unwrap();
        assert_eq!(within(stream.first_message()).await.unwrap().data, "old");

        old_peer.disconnect();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(stream.state(), ConnectionState::Reconnecting);

        let first = stream.first_message();
        let new_peer = within(server.accept()).await.unwrap();
        new_peer.send("new").unwrap();
        assert_eq!(within(first).await.unwrap().data, "new");
    }

    #[tokio::test]
    async fn connect_failures_are_retried() {
        let (connector, mut server) = MemoryConnector::pair();
        server.refuse_connections(true);
        let stream = ReconnectingStream::open_with("mem://state", Arc::new(connector), fast_policy());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_ne!(stream.state(), ConnectionState::Open);

        server.refuse_connections(false);
        let peer = within(server.accept()).await.unwrap();
        within(stream.wait_open()).await.unwrap();
        peer.send("hello").unwrap();
        assert_eq!(within(stream.first_message()).await.unwrap().data, "hello");
    }

    #[tokio::test]
    async fn change_url_swaps_transport_and_keeps_waiters() {
        let (stream, mut server) = memory_stream("mem://state");
        let old_peer = within(server.accept()).await.unwrap();
        old_peer.send("old").unwrap();
        within(stream.first_message()).await.unwrap();

        let pending = stream.next_message();
        stream.change_url("mem://state?tcp=foo");
        assert_eq!(stream.url(), "mem://state?tcp=foo");

        // Frames from the superseded transport are dropped.
        let _ = old_peer.send("stale");

        let new_peer = within(server.accept()).await.unwrap();
        assert_eq!(new_peer.url(), "mem://state?tcp=foo");
        new_peer.send("fresh").unwrap();

        assert_eq!(within(pending).await.unwrap().data, "fresh");
        assert_eq!(within(stream.first_message()).await.unwrap().data, "fresh");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(old_peer.is_closed());
    }

    #[tokio::test]
    async fn close_rejects_pending_waiters_and_stops_reconnecting() {
        let (stream, mut server) = memory_stream("mem://state");
        let mut peer = within(server.accept()).await.unwrap();
        let pending_first = stream.first_message();
        let pending_next = stream.next_message();
        let mut listener = stream.listen();

        stream.close();
        stream.close();

        assert_eq!(within(pending_first).await, Err(ArmError::Closed));
        assert_eq!(within(pending_next).await, Err(ArmError::Closed));
        assert!(within(listener.recv()).await.is_none());
        assert_eq!(stream.state(), ConnectionState::Closed);
        assert_eq!(within(stream.first_message()).await, Err(ArmError::Closed));

        // The supervisor closes the transport and never dials again.
        assert!(within(peer.recv()).await.is_none());
        let redial = tokio::time::timeout(Duration::from_millis(50), server.accept()).await;
        assert!(!matches!(redial, Ok(Some(_))));
    }

    #[tokio::test]
    async fn close_while_reconnecting_is_safe() {
        let (connector, server) = MemoryConnector::pair();
        server.refuse_connections(true);
        let stream = ReconnectingStream::open_with("mem://state", Arc::new(connector), fast_policy());
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.close();
        assert_eq!(within(stream.wait_open()).await, Err(ArmError::Closed));
    }

    #[tokio::test]
    async fn send_writes_to_live_transport() {
        let (stream, mut server) = memory_stream("mem://jog");
        let mut peer = within(server.accept()).await.unwrap();
        within(stream.wait_open()).await.unwrap();

        within(stream.send("{\"command\":\"stop\"}")).await.unwrap();
        assert_eq!(within(peer.recv()).await.unwrap(), "{\"command\":\"stop\"}");

        stream.close();
        assert_eq!(within(stream.send("late")).await, Err(ArmError::Closed));
    }
}
