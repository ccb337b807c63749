//! Core of a measurement runtime for parallel applications.
//!
//! The crate provides the pieces every other part of the runtime is built on:
//!
//! * [`allocator`]: a page-based arena allocator with per-owner page managers, a union-object
//!   pool for its own metadata, and relocatable ("movable") memory handles.
//! * [`memory`]: the measurement memory layer that creates the process allocator from the
//!   [`Options`](util::options::Options) and handles out-of-memory situations.
//! * [`substrates`]: packed, cache-aligned dispatch tables that fan every measurement event
//!   out to all active consumers (properties, tracing, profiling, plugins).
//! * [`thread`]: locations and the fork/join thread team identity, including the unification
//!   of thread teams into communicator definitions.
//! * [`measurement`]: the process measurement state tying all of the above together.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod allocator;
pub mod definitions;
pub mod ipc;
pub mod measurement;
pub mod memory;
pub mod substrates;
pub mod thread;
pub mod util;

pub use crate::measurement::{Measurement, MeasurementBuilder};
