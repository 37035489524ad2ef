//! # tandem-types
//!
//! Wire format types for the Tandem action-log synchronization protocol.
//!
//! This crate provides the foundational types used across all Tandem crates:
//! - [`ActionId`] - Globally unique, totally ordered action identifiers
//! - [`Action`], [`Meta`], [`Entry`] - The log data model
//! - [`Message`] - Protocol frames with their JSON-array codec
//! - [`SyncError`] - Protocol-level error type

#![warn(missing_docs)]
#![warn(clippy::all)]

mod action;
mod error;
mod ids;
mod messages;

pub use action::{is_older, Action, Entry, Meta, MetaDiff};
pub use error::{ErrorKind, SyncError};
pub use ids::{ActionId, IdError};
pub use messages::{AuthBlock, CodecError, Message, PROTOCOL};
