//! The reconciliation driver.

use crate::config::ReconcileConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::handlers::{Prepared, Resource, StateHandlers};
use crate::state::LifecycleState;
use ovsdb_idl::{Idl, Outcome, SchemaFilter, StreamTransport, Transport};
use ovsdb_protocol::DatabaseSchema;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of a successful reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    /// True if the database was (or in check mode, would be) changed.
    pub changed: bool,
    /// Number of commits sent.
    pub attempts: u32,
    /// Operations in the last commit sent.
    pub operations: usize,
}

impl Report {
    fn unchanged() -> Self {
        Self {
            changed: false,
            attempts: 0,
            operations: 0,
        }
    }
}

/// Drives one entity towards its requested state.
///
/// The sequence is: register interest, connect and wait for the initial
/// sync, prepare, then build and commit. A commit answered with
/// [`Outcome::TryAgain`] is rebuilt from a fresh prepare, up to
/// [`RetryConfig::max_attempts`](crate::RetryConfig::max_attempts) commits.
/// The session is closed on every path.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcileConfig,
}

impl Reconciler {
    /// Creates a reconciler.
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Reconciles `resource` over `transport`.
    pub fn reconcile<R, T>(
        &self,
        resource: &R,
        state: LifecycleState,
        schema: DatabaseSchema,
        transport: T,
    ) -> ReconcileResult<Report>
    where
        R: Resource,
        T: Transport,
    {
        let handlers = R::handlers(state);
        let mut filter = SchemaFilter::new(schema);
        (handlers.register_interest)(resource, &mut filter)?;

        let mut idl = Idl::connect(transport, filter, self.config.idl.clone())?;
        let result = self.drive(resource, state, &handlers, &mut idl);
        idl.close();

        match &result {
            Ok(report) => info!(
                kind = R::KIND,
                %state,
                changed = report.changed,
                attempts = report.attempts,
                "reconciled"
            ),
            Err(e) => warn!(kind = R::KIND, %state, error = %e, "reconcile failed"),
        }
        result
    }

    /// Reconciles `resource` against the socket of its database under
    /// `rundir`.
    pub fn reconcile_at<R: Resource>(
        &self,
        resource: &R,
        state: LifecycleState,
        schema: DatabaseSchema,
        rundir: &Path,
    ) -> ReconcileResult<Report> {
        let remote = R::ENDPOINT.remote(rundir);
        let transport = StreamTransport::open(&remote, &self.config.idl)?;
        self.reconcile(resource, state, schema, transport)
    }

    fn drive<R: Resource, T: Transport>(
        &self,
        resource: &R,
        state: LifecycleState,
        handlers: &StateHandlers<R>,
        idl: &mut Idl<T>,
    ) -> ReconcileResult<Report> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            let plan = match (handlers.prepare)(resource, idl.replica())? {
                Prepared::NoChange => {
                    debug!(kind = R::KIND, %state, "already in requested state");
                    return Ok(Report {
                        attempts,
                        ..Report::unchanged()
                    });
                }
                Prepared::Change(plan) => plan,
            };

            if self.config.check_mode {
                debug!(kind = R::KIND, %state, "check mode, not committing");
                return Ok(Report {
                    changed: true,
                    ..Report::unchanged()
                });
            }

            let mut txn = idl.transaction();
            (handlers.build_transaction)(resource, &plan, idl.replica(), &mut txn)?;
            if !txn.is_empty() {
                attempts += 1;
            }
            let report = idl.commit_block_detailed(txn)?;

            match report.outcome {
                Outcome::Success => {
                    return Ok(Report {
                        changed: true,
                        attempts,
                        operations: report.operations,
                    })
                }
                Outcome::Unchanged => {
                    return Ok(Report {
                        changed: false,
                        attempts,
                        operations: report.operations,
                    })
                }
                Outcome::TryAgain if attempts < max_attempts => {
                    debug!(kind = R::KIND, attempt = attempts, "conflict, retrying");
                    idl.run()?;
                }
                outcome => {
                    return Err(ReconcileError::TransactionFailed {
                        message: (handlers.failure_message)(resource, &plan),
                        outcome,
                        attempts,
                    })
                }
            }
        }
    }
}
