//! `armlink-stream` – The Wire
//!
//! One logical duplex connection per [`ReconnectingStream`], kept alive
//! across transport drops without the caller having to care.
//!
//! # Modules
//!
//! - [`reconnecting`] – [`ReconnectingStream`]: supervisor task that owns the
//!   live transport, reconnects with backoff, and hands frames to one-shot
//!   waiters and listeners in arrival order.
//! - [`transport`] – the [`Connector`] / [`Transport`] seam.
//! - [`ws`] – [`WsConnector`], the WebSocket transport (tokio-tungstenite).
//! - [`memory`] – [`MemoryConnector`], an in-process transport used to embed
//!   a service in the same process and to drive streams from tests.
//! - [`backoff`] – [`ReconnectPolicy`], exponential retry cadence.
//! - [`endpoint`] – instance URL normalisation and the `http→ws` / `https→wss`
//!   scheme mapping.
//! - [`rest`] – [`RestScope`], cell-scoped JSON requests with status codes
//!   mapped onto [`ArmError`](armlink_types::ArmError).

pub mod backoff;
pub mod endpoint;
pub mod memory;
pub mod reconnecting;
pub mod rest;
pub mod transport;
pub mod ws;

pub use backoff::ReconnectPolicy;
pub use endpoint::{normalize_instance_url, to_websocket_url};
pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use reconnecting::{Frame, FrameListener, ReconnectingStream};
pub use rest::RestScope;
pub use transport::{Connector, Transport};
pub use ws::WsConnector;
