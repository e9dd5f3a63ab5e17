//! Per-state handler tables.
//!
//! An entity kind answers four questions for each lifecycle state: which
//! columns it reads, whether anything needs to change, how to stage the
//! change, and how to describe a failed commit. [`Resource::handlers`]
//! resolves the state to typed function references once, before the driver
//! connects.

use crate::endpoints::Endpoint;
use crate::error::ReconcileResult;
use crate::state::LifecycleState;
use ovsdb_idl::{IdlResult, Replica, SchemaFilter, Transaction};

/// What [`StateHandlers::prepare`] decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared<P> {
    /// The database already matches; nothing is staged or sent.
    NoChange,
    /// A change is needed; the plan carries what `prepare` looked up.
    Change(P),
}

impl<P> Prepared<P> {
    /// Returns true if a change is needed.
    pub fn is_change(&self) -> bool {
        matches!(self, Prepared::Change(_))
    }
}

/// Registers the tables and columns an entity reads.
pub type RegisterInterest<R> = fn(&R, &mut SchemaFilter) -> IdlResult<()>;
/// Compares the replica with the requested state.
pub type Prepare<R> = fn(&R, &Replica) -> ReconcileResult<Prepared<<R as Resource>::Plan>>;
/// Stages the planned change.
pub type BuildTransaction<R> =
    fn(&R, &<R as Resource>::Plan, &Replica, &mut Transaction) -> ReconcileResult<()>;
/// Describes a failed commit.
pub type FailureMessage<R> = fn(&R, &<R as Resource>::Plan) -> String;

/// Handlers of one entity kind for one lifecycle state.
pub struct StateHandlers<R: Resource> {
    /// Declares replicated tables and columns.
    pub register_interest: RegisterInterest<R>,
    /// Decides whether a change is needed.
    pub prepare: Prepare<R>,
    /// Stages the change. Runs once per attempt against a fresh
    /// transaction.
    pub build_transaction: BuildTransaction<R>,
    /// Prefix of the error reported when the commit fails.
    pub failure_message: FailureMessage<R>,
}

impl<R: Resource> Clone for StateHandlers<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: Resource> Copy for StateHandlers<R> {}

impl<R: Resource> std::fmt::Debug for StateHandlers<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHandlers")
            .field("kind", &R::KIND)
            .finish_non_exhaustive()
    }
}

impl<R: Resource> Default for StateHandlers<R>
where
    R::Plan: Default,
{
    /// Handlers that register nothing, always plan a change, stage nothing
    /// and report a generic failure.
    fn default() -> Self {
        Self {
            register_interest: |_, _| Ok(()),
            prepare: |_, _| Ok(Prepared::Change(R::Plan::default())),
            build_transaction: |_, _, _, _| Ok(()),
            failure_message: |_, _| "OVSDB transaction failed".to_string(),
        }
    }
}

/// An entity kind that can be reconciled.
pub trait Resource: Sized {
    /// Lookups carried from `prepare` to `build_transaction`.
    type Plan;

    /// Entity kind name used in logs.
    const KIND: &'static str;

    /// Database holding the entity.
    const ENDPOINT: Endpoint;

    /// Returns the handlers for `state`.
    fn handlers(state: LifecycleState) -> StateHandlers<Self>;
}
