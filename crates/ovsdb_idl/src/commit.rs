//! Commit of a transaction and classification of its outcome.

use crate::error::{IdlError, IdlResult, RejectReason};
use crate::idl::Idl;
use crate::transport::Transport;
use crate::txn::{CommitPlan, Transaction};
use ovsdb_protocol::{errors, ClientMessage, OperationResult, ServerMessage};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Server-reported failure of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitError {
    /// Error string, usually one of [`ovsdb_protocol::errors`].
    pub error: String,
    /// Human-readable detail.
    pub details: Option<String>,
}

impl CommitError {
    /// Classifies the error.
    pub fn reason(&self) -> RejectReason {
        RejectReason::from_error(&self.error)
    }

    /// Returns true for dangling strong references.
    pub fn is_referential_integrity(&self) -> bool {
        self.reason() == RejectReason::ReferentialIntegrity
    }
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{} ({details})", self.error),
            None => f.write_str(&self.error),
        }
    }
}

/// Result of committing one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The transaction changed the database.
    Success,
    /// The transaction had nothing to change and was not sent.
    Unchanged,
    /// A verified value changed concurrently; rebuild and retry.
    TryAgain,
    /// The transaction was aborted.
    Aborted,
    /// The server rejected the transaction.
    Error(CommitError),
}

impl Outcome {
    /// Returns true for [`Outcome::Success`] and [`Outcome::Unchanged`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Unchanged)
    }

    /// Returns true if the database was changed.
    pub fn changed(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Converts a failed outcome into the matching error.
    ///
    /// `attempts` is reported for conflicts. Returns `None` for successful
    /// outcomes.
    pub fn into_error(self, attempts: u32) -> Option<IdlError> {
        match self {
            Outcome::Success | Outcome::Unchanged => None,
            Outcome::TryAgain => Some(IdlError::TransactionConflict { attempts }),
            Outcome::Aborted => Some(IdlError::TransactionRejected {
                reason: RejectReason::Aborted,
                detail: errors::ABORTED.to_string(),
            }),
            Outcome::Error(e) => Some(IdlError::rejected(&e.error, e.details.as_deref())),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Unchanged => f.write_str("unchanged"),
            Outcome::TryAgain => f.write_str("try again"),
            Outcome::Aborted => f.write_str("aborted"),
            Outcome::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Outcome of a commit together with what the server assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    /// Commit outcome.
    pub outcome: Outcome,
    /// Number of wire operations sent (zero when nothing was sent).
    pub operations: usize,
    inserted: BTreeMap<Uuid, Uuid>,
}

impl CommitReport {
    fn unsent(outcome: Outcome) -> Self {
        Self {
            outcome,
            operations: 0,
            inserted: BTreeMap::new(),
        }
    }

    /// Returns the real UUID of a row inserted under temporary UUID `temp`.
    pub fn inserted_uuid(&self, temp: Uuid) -> Option<Uuid> {
        self.inserted.get(&temp).copied()
    }

    /// Returns every temporary-to-real UUID mapping.
    pub fn inserted(&self) -> &BTreeMap<Uuid, Uuid> {
        &self.inserted
    }
}

impl<T: Transport> Idl<T> {
    /// Sends `txn` and blocks until the server answers.
    ///
    /// Processes replica updates while waiting; a successful commit's
    /// changes are in the replica when this returns. The wait is bounded by
    /// [`IdlConfig::commit_timeout`](crate::IdlConfig::commit_timeout).
    pub fn commit_block(&mut self, txn: Transaction) -> IdlResult<Outcome> {
        Ok(self.commit_block_detailed(txn)?.outcome)
    }

    /// Like [`Idl::commit_block`], also reporting the UUIDs assigned to
    /// inserted rows.
    pub fn commit_block_detailed(&mut self, txn: Transaction) -> IdlResult<CommitReport> {
        if txn.session() != self.replica().session() {
            return Err(IdlError::InvalidOperation(
                "transaction was started on another session".to_string(),
            ));
        }

        let plan = txn.into_plan()?;
        if plan.is_empty() {
            debug!("nothing to commit");
            return Ok(CommitReport::unsent(Outcome::Unchanged));
        }

        let CommitPlan {
            operations,
            inserts,
        } = plan;
        let count = operations.len();
        let database = self.replica().database().to_string();
        let id = self.request(|id| ClientMessage::Transact {
            id,
            database,
            operations,
        })?;
        debug!(id, operations = count, "transaction sent");

        let timeout = self.config().commit_timeout;
        let results = match self.await_reply(id, timeout, "commit")? {
            ServerMessage::Transacted { results, .. } => results,
            ServerMessage::Error { error, .. } => {
                warn!(id, error = %error, "transaction refused");
                return Ok(CommitReport {
                    outcome: Outcome::Error(CommitError {
                        error,
                        details: None,
                    }),
                    operations: count,
                    inserted: BTreeMap::new(),
                });
            }
            other => {
                return Err(IdlError::Server(format!(
                    "unexpected {} reply to transact",
                    other.name()
                )))
            }
        };

        let outcome = classify(&results, count);
        let inserted = if outcome == Outcome::Success {
            inserts
                .iter()
                .filter_map(|(index, temp)| match results.get(*index) {
                    Some(OperationResult::Inserted { uuid }) => Some((*temp, *uuid)),
                    _ => None,
                })
                .collect()
        } else {
            BTreeMap::new()
        };

        match &outcome {
            Outcome::Success => info!(id, operations = count, "transaction committed"),
            other => debug!(id, outcome = %other, "transaction not committed"),
        }
        Ok(CommitReport {
            outcome,
            operations: count,
            inserted,
        })
    }
}

fn classify(results: &[OperationResult], expected: usize) -> Outcome {
    let failure = results.iter().find_map(|r| match r {
        OperationResult::Error { error, details } => Some((error, details)),
        _ => None,
    });
    if let Some((error, details)) = failure {
        return match error.as_str() {
            errors::TIMED_OUT => Outcome::TryAgain,
            errors::ABORTED => Outcome::Aborted,
            _ => Outcome::Error(CommitError {
                error: error.clone(),
                details: details.clone(),
            }),
        };
    }
    if results.len() < expected {
        return Outcome::Error(CommitError {
            error: "incomplete reply".to_string(),
            details: Some(format!(
                "{} results for {expected} operations",
                results.len()
            )),
        });
    }
    Outcome::Success
}
