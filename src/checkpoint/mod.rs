/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Building and validating [checkpoints](crate::types::checkpoint::Checkpoint): the
//! [builder](builder) aggregates an epoch's admitted blocks into a quorum-signed snapshot; the
//! [validator](validator) independently verifies snapshots received from peers.

pub mod builder;

pub mod validator;
