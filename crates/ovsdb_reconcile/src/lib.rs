//! # OVSDB Reconcile
//!
//! Idempotent desired-state management of OVN and Open vSwitch entities.
//!
//! This crate provides:
//! - Lifecycle states (`present`, `absent`) parsed from their names
//! - Per-state handler tables resolved once per entity kind
//! - A driver that connects, compares, commits and retries on conflicts
//! - Logical switches, logical switch ports, southbound connections and
//!   the local OVN controller settings
//! - Well-known database sockets of an OVS run directory
//!
//! ## Architecture
//!
//! Each entity kind implements [`Resource`]. For the requested
//! [`LifecycleState`] it hands the [`Reconciler`] four functions: one
//! registering the columns it reads, one deciding whether the database
//! already matches, one staging the change and one naming a failed commit.
//! The reconciler owns the session and the retry loop; entity code never
//! talks to the server directly.
//!
//! ## Key Invariants
//!
//! - A database that already matches receives no transaction at all
//! - A commit is retried only when it lost to a concurrent writer, and at
//!   most [`RetryConfig::max_attempts`] commits are sent
//! - Every retry rebuilds the change from a fresh replica snapshot
//! - The session is closed on every exit path
//! - In check mode nothing is committed

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod driver;
mod endpoints;
mod error;
mod handlers;
mod resources;
mod state;

pub use config::{ReconcileConfig, RetryConfig, DEFAULT_MAX_ATTEMPTS};
pub use driver::{Reconciler, Report};
pub use endpoints::{Endpoint, DEFAULT_RUNDIR, NORTHBOUND, OPEN_VSWITCH, SOUTHBOUND};
pub use error::{ReconcileError, ReconcileResult};
pub use handlers::{
    BuildTransaction, FailureMessage, Prepare, Prepared, RegisterInterest, Resource,
    StateHandlers,
};
pub use resources::{
    ConnectionPlan, ControllerPlan, LogicalSwitch, LogicalSwitchPort, OvnController, PortPlan,
    PortType, SbConnection, SwitchPlan,
};
pub use state::LifecycleState;
