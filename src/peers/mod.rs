/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Peer federation tracking: the owned [registry](registry) of known federations and the
//! [discovery thread](directory) that populates it.

pub mod directory;

pub mod registry;
