//! Shared protocol definitions for the Bazaar relay wire format.

pub mod codec;
pub mod event;
pub mod ids;
