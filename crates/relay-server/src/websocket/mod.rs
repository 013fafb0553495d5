//! Subscriber connections, membership, fan-out, and control dispatch.

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod registry;
pub mod session;
