/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pairwise synchronization protocol: [wire messages](messages), the [serving
//! side](server), and the [session state machine](session) that drives a sync with one peer.

pub(crate) mod manager;

pub mod messages;

pub mod server;

pub mod session;
