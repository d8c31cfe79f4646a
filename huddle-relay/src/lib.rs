//! Huddle relay server library.
//!
//! Exposes the room coordinator and WebSocket transport for use in tests and
//! embedding. Participants are grouped into rooms by caller-supplied ids and
//! signaling envelopes are relayed to the rest of the room or to a single
//! named member.

pub mod config;
pub mod connection;
pub mod delivery;
pub mod loopback;
pub mod registry;
pub mod relay;
pub mod rooms;
