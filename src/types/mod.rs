/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types common across the sub-protocols of FedSync-rs.
//!
//! Types specific to a single component live in that component's own module.

pub mod basic;

pub mod block;

pub mod checkpoint;

pub mod keypair;

pub mod merkle;

pub mod validator_set;
