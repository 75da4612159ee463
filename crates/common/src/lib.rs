//! Common types and utilities for the oracle node
//!
//! This crate provides the domain types, the in-process command bus and
//! the shutdown controller shared by every pipeline crate.
//!
//! # Modules
//!
//! - [`error`] - Command bus error types
//! - [`types`] - Shared domain types (Config, FeedData, LocalAggregate, etc.)
//! - [`bus`] - Typed in-process command bus
//! - [`shutdown`] - CancellationToken based shutdown coordination

pub mod bus;
pub mod error;
pub mod shutdown;
pub mod types;

pub use bus::{BusMessage, Command, CommandResponse, Component, MessageBus, RawCommand};
pub use error::{BusError, Result};
pub use shutdown::ShutdownController;
pub use types::*;
