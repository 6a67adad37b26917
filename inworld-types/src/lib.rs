//! Inworld Types
//!
//! Shared type definitions for packets, routing metadata, session options
//! and connection state used across the Inworld client crates.

pub mod connection;
pub mod error;
pub mod names;
pub mod packets;
pub mod schemas;

pub use connection::*;
pub use error::*;
pub use names::*;
pub use packets::*;
pub use schemas::*;
