//! Addressed message relay over WebSocket.
//!
//! Clients connect to `/ws`, receive a generated identifier in a welcome
//! notice, and send `{"id": <peer>, "message": <text>}` envelopes that the
//! hub forwards verbatim to the addressed peer.

pub mod config;
pub mod hub;
pub mod routes;
pub mod state;
