//! Shared wire definitions for the Huddle signaling relay.

pub mod envelope;
pub mod room;
