/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! quorum_smr is the delivery core of a state machine replication stack: everything that happens
//! to a consensus decision *after* it is decided, plus the client side that certifies the
//! results.
//!
//! The crate has three cooperating parts:
//!
//! - The [delivery pipeline](crate::delivery): applies decided batches to the replicated
//!   [application](crate::app::App) in strict [execution id](crate::types::basic::ExecutionId)
//!   order, exactly once, taking a [checkpoint](crate::types::transfer::Checkpoint) of the
//!   application state at a fixed period.
//! - The [state transfer subsystem](crate::state_transfer): detects when this replica has
//!   fallen behind the group (on the evidence of more than `f` distinct peers), retrieves the
//!   missing [transferable state](crate::types::transfer::TransferableState) from a randomly
//!   chosen peer, authenticates it against `f+1` matching content hashes, and installs it. The
//!   same subsystem answers the transfer requests of other lagging replicas.
//! - The client-side [quorum certifier](crate::client): issues requests to the replica group
//!   and releases a result only once enough byte-identical replies have arrived that at least
//!   one of them came from an honest replica.
//!
//! Consensus itself is *not* in this crate. The library user's consensus layer hands decisions
//! to the replica through [Replica::submit_decision](crate::replica::Replica::submit_decision)
//! and lag evidence through [Replica::report_ahead](crate::replica::Replica::report_ahead).
//! Networking is pluggable through the [Network](crate::networking::Network) trait.
//!
//! To start a replica, see [crate::replica].

pub mod app;

pub mod client;

pub mod delivery;

pub(crate) mod event_bus;

pub mod events;

pub mod logging;

pub mod messages;

pub mod networking;

pub mod replica;

pub mod state_transfer;

pub mod types;
