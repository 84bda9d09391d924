//! `armlink-jogging` – Manual Motion
//!
//! Turns discrete "move this axis" / "stop" commands into a cancellable
//! motion request stream.
//!
//! # Modules
//!
//! - [`codec`] – [`JoggingCodec`]: frame shapes for the stream protocols,
//!   command validation and unit helpers.
//! - [`channel`] – the [`CommandChannel`] seam with its two implementations,
//!   [`StreamCommandChannel`] (one stream per mode URL) and
//!   [`RestCommandChannel`] (request/response).
//! - [`session`] – [`JoggingSession`]: the mode / active-command state
//!   machine that guarantees a stop precedes every mode switch and every
//!   replacement command.

pub mod channel;
pub mod codec;
pub mod session;

pub use channel::{CommandChannel, JoggingUrls, RestCommandChannel, StreamCommandChannel};
pub use codec::{
    CARTESIAN_AXES, JoggingCodec, degrees_to_radians, radians_to_degrees, validate_command,
    velocity_vector,
};
pub use session::{DEFAULT_ACK_TIMEOUT, JoggingSession};
