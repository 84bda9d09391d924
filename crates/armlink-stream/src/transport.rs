//! The transport seam.
//!
//! [`ReconnectingStream`][crate::ReconnectingStream] never speaks a concrete
//! protocol.  It asks a [`Connector`] for a fresh [`Transport`] every time it
//! (re)connects and drives that transport until it drops.

use async_trait::async_trait;
use armlink_types::ArmError;

/// One live duplex connection carrying text frames.
///
/// # Contract
///
/// * `recv` must be cancel-safe: the stream supervisor races it against
///   control messages in `tokio::select!`.
/// * `recv` returns `None` once the peer has closed the connection.
#[async_trait]
pub trait Transport: Send {
    /// Wait for the next inbound text frame.
    async fn recv(&mut self) -> Option<Result<String, ArmError>>;

    /// Write one text frame.  Resolves once the frame has been handed to the
    /// underlying connection.
    async fn send(&mut self, text: String) -> Result<(), ArmError>;

    /// Close the connection.  Errors are ignored.
    async fn close(&mut self);
}

/// Factory for [`Transport`]s.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new transport to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ArmError>;
}
