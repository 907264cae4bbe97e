//! Bazaar relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts WebSocket connections, registers each one under the
//! user id it joins as, and routes direct messages and read receipts into
//! per-user rooms. Delivery is fire-and-forget: nothing is queued for
//! offline users.

pub mod config;
pub mod registry;
pub mod relay;
pub mod router;
