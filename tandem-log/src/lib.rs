//! # tandem-log
//!
//! The action log for the Tandem sync protocol.
//!
//! This crate provides:
//! - [`Store`] - The persistence capability set a log is built on
//! - [`MemoryStore`] - The in-memory reference store (used by every test)
//! - [`Log`] - Id generation, invariants, retention, and lifecycle events
//! - [`Clock`], [`SystemClock`], [`TestTime`] - Injectable time sources
//!
//! ## Design
//!
//! A [`Log`] never touches the wallclock or the process environment directly:
//! time comes from an injected [`Clock`] and persistence from an injected
//! [`Store`]. Everything interesting about a log is therefore reproducible in
//! unit tests with [`TestTime`] and [`MemoryStore`].

#![warn(missing_docs)]
#![warn(clippy::all)]

mod clock;
mod log;
mod memory;
mod store;

pub use clock::{Clock, SystemClock, TestTime};
pub use log::{HookHandle, Iteration, Log, LogError, NewMeta};
pub use memory::MemoryStore;
pub use store::{Criteria, LastSynced, Order, Page, PageToken, Store, StoreError, SyncedUpdate};
