//! # tunnel-core
//!
//! Pure logic for tunnel-bench (no I/O, instant tests).
//!
//! This crate implements the data model, run lifecycle state machine and
//! sweep enumeration without any network, process or clock access.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about lifecycle transitions
//!
//! The actual I/O (agent channels, media pipeline, artifact upload) is
//! performed by `tunnel-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capabilities;
pub mod configuration;
pub mod schedule;
pub mod state;
pub mod sweep;

pub use capabilities::{
    is_connectionless, Capability, CapabilitySet, DeliveryMode, CONNECTIONLESS_IMPLEMENTATIONS,
    DEFAULT_EXCLUDED_IMPLEMENTATIONS, NO_CONGESTION_CONTROL,
};
pub use configuration::{ConfigurationPair, DirectionConfig};
pub use schedule::{Constraint, ConstraintSchedule, LinkStep};
pub use state::{Action, Event, RunState};
pub use sweep::{Combination, SweepEntry, SweepOutcome, SweepPlan, SweepReport};
