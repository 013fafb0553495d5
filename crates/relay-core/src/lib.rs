//! # relay-core
//!
//! Foundation types shared by the comment relay crates.
//!
//! - [`messages`]: the relay → subscriber wire format and control-request parsing
//! - [`ids`]: branded identifiers for subscribers and upstream sessions
//! - [`upstream`]: the upstream live-session capability (listener, session, connector)
//! - [`errors`]: typed errors for upstream and control handling

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod messages;
pub mod upstream;

pub use errors::{ControlError, UpstreamError};
pub use ids::{SessionKey, SubscriberId};
pub use messages::{ControlAction, RelayMessage, normalize_username, parse_control};
