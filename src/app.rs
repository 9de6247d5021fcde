/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definitions for the pluggable application ([App]) and the front-door bookkeeping hook
//! ([ClientsManager]).
//!
//! Besides implementing the functions specified in the trait, implementors of [App] are
//! additionally expected to be *deterministic*: every function should evaluate to the same value
//! every time it is called with the same arguments and in the same state. Non-deterministic
//! applications make honest replicas produce non-identical replies, which the client-side
//! certifier surfaces as a quorum failure.

use crate::types::batch::{DeliveryContext, OrderedRequest};

/// How the application prefers to receive the requests of a decided batch. Dispatched once per
/// batch on the delivery path, not via runtime type inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One [App::execute_ordered] call per request.
    Single,
    /// One [App::execute_batch] call per decided batch.
    Batch,
}

/// The circumstances in which the application can fail to execute a request. A failed request is
/// logged and skipped; it never stalls delivery of the rest of the batch or of later batches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecuteError {
    /// The request is invalid in the view of application-level rules.
    Rejected,
    /// The application hit an internal error while executing the request.
    Internal,
}

/// The replicated state machine. Implementors must be deterministic (see the module-level docs),
/// and [App::install_snapshot] must be idempotent and total: installing the same snapshot twice
/// yields the same state as installing it once, and every byte sequence produced by
/// [App::snapshot] must install successfully.
pub trait App: Send + 'static {
    /// How this application wants batches dispatched. Consulted on every delivery; implementors
    /// should return a constant.
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Single
    }

    /// Apply one consensus-ordered request and produce the reply payload for its sender.
    fn execute_ordered(
        &mut self,
        request: &OrderedRequest,
        context: &DeliveryContext,
    ) -> Result<Vec<u8>, ExecuteError>;

    /// Answer a read-only request from local state, without going through consensus.
    fn execute_unordered(&mut self, request: &OrderedRequest) -> Result<Vec<u8>, ExecuteError>;

    /// Apply a whole decided batch at once. The default implementation applies each request with
    /// [App::execute_ordered]; applications that batch their side effects (e.g., one storage
    /// commit per batch) override this.
    fn execute_batch(
        &mut self,
        requests: &[OrderedRequest],
        context: &DeliveryContext,
    ) -> Vec<Result<Vec<u8>, ExecuteError>> {
        requests
            .iter()
            .map(|request| self.execute_ordered(request, context))
            .collect()
    }

    /// Serialize the full application state for checkpointing.
    fn snapshot(&mut self) -> Vec<u8>;

    /// Replace the full application state with a snapshot previously produced by
    /// [App::snapshot] (possibly on another replica).
    fn install_snapshot(&mut self, snapshot: &[u8]);
}

/// Bookkeeping hook for the external clients manager. The delivery pipeline calls
/// [ClientsManager::request_delivered] for every request it applies, before handing the request
/// to the application, so the front door can retire pending entries and update its dedup state.
pub trait ClientsManager: Send + 'static {
    fn request_delivered(&mut self, request: &OrderedRequest);
}

/// A [ClientsManager] for deployments that do their front-door bookkeeping elsewhere.
pub struct NoClientsManager;

impl ClientsManager for NoClientsManager {
    fn request_delivered(&mut self, _request: &OrderedRequest) {}
}
