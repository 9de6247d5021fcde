/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of the delivery core.
//!
//! Types specific to a single component live in that component's module, e.g., the state
//! transfer wire types in [`crate::state_transfer::messages`].

pub mod basic;

pub mod batch;

pub mod keypair;

pub mod transfer;

pub mod view;
