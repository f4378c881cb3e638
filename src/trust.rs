/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The trust ledger: per-peer-federation trust scores in `[0, 1]` updated by synchronization
//! outcomes, and the permanent exclusion set for equivocating validators.
//!
//! Trust gates which peers a node spends sync work on and how quickly failures escalate. It
//! deliberately never enters the reconciler's tie-breaks, which must be reproducible on both
//! sides of a divergence: only the equivocation exclusion set — derived from evidence both
//! sides can verify — affects quorum counting.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::events::{EquivocationDetectedEvent, Event, TrustUpdatedEvent};
use crate::peers::registry::SharedRegistry;
use crate::types::basic::{Epoch, FederationId, VerifyingKeyBytes};

/// Trust gained by a successfully completed sync session.
const SUCCESS_DELTA: f64 = 0.05;
/// Trust lost when a peer serves a checkpoint that fails validation.
const VALIDATION_FAILURE_DELTA: f64 = 0.10;
/// Trust lost when a peer times out or is unreachable.
const UNREACHABLE_DELTA: f64 = 0.02;
/// Consecutive validation failures after which a peer is treated as adversarial rather than
/// unlucky, and its trust is floored.
const ADVERSARIAL_THRESHOLD: u32 = 3;

/// Writes trust updates into the [peer registry](crate::peers::registry::PeerRegistry). One of
/// the registry's two writers (the other being the peer directory).
#[derive(Clone)]
pub struct TrustLedger {
    registry: SharedRegistry,
    event_publisher: Option<Sender<Event>>,
}

impl TrustLedger {
    pub fn new(registry: SharedRegistry, event_publisher: Option<Sender<Event>>) -> TrustLedger {
        TrustLedger {
            registry,
            event_publisher,
        }
    }

    /// A sync session with `federation` completed without failures.
    pub fn record_success(&self, federation: &FederationId) {
        let mut score = None;
        {
            let mut registry = self.registry.lock().unwrap();
            registry.with_record(federation, |record| {
                record.consecutive_failures = 0;
                record.trust.increase(SUCCESS_DELTA);
                score = Some(record.trust.value());
            });
        }
        self.publish_update(federation, score);
    }

    /// `federation` delivered a checkpoint that failed validation. A single failure is treated
    /// as possibly transient corruption; repeated failures mark the peer adversarial.
    pub fn record_validation_failure(&self, federation: &FederationId) {
        let mut score = None;
        {
            let mut registry = self.registry.lock().unwrap();
            registry.with_record(federation, |record| {
                record.consecutive_failures += 1;
                if record.consecutive_failures >= ADVERSARIAL_THRESHOLD {
                    record.trust.floor();
                } else {
                    record.trust.decrease(VALIDATION_FAILURE_DELTA);
                }
                score = Some(record.trust.value());
            });
        }
        self.publish_update(federation, score);
    }

    /// `federation` could not be reached or did not answer within its deadline.
    pub fn record_unreachable(&self, federation: &FederationId) {
        let mut score = None;
        {
            let mut registry = self.registry.lock().unwrap();
            registry.with_record(federation, |record| {
                record.trust.decrease(UNREACHABLE_DELTA);
                score = Some(record.trust.value());
            });
        }
        self.publish_update(federation, score);
    }

    /// Evidence showed `offender` signing two different checkpoints at the same epoch. The
    /// offender's signatures are excluded from all quorum counting from now on; if the
    /// offender's key belongs to a known peer federation, that federation's trust is floored.
    pub fn record_equivocation(&self, offender: VerifyingKeyBytes, epoch: Epoch) {
        let mut floored: Option<FederationId> = None;
        {
            let mut registry = self.registry.lock().unwrap();
            registry.exclude_validator(offender);
            registry.with_record_by_key(&offender, |record| {
                record.trust.floor();
                floored = Some(record.federation);
            });
        }
        Event::publish(
            &self.event_publisher,
            Event::EquivocationDetected(EquivocationDetectedEvent {
                timestamp: SystemTime::now(),
                offender,
                epoch,
            }),
        );
        if let Some(federation) = floored {
            self.publish_update(&federation, Some(0.0));
        }
    }

    /// Whether `federation` is trusted enough to spend a sync session on.
    pub fn is_syncable(&self, federation: &FederationId, min_trust: f64) -> bool {
        let registry = self.registry.lock().unwrap();
        match registry.get(federation) {
            Some(record) => record.trust.value() >= min_trust,
            None => false,
        }
    }

    fn publish_update(&self, federation: &FederationId, score: Option<f64>) {
        if let Some(score) = score {
            Event::publish(
                &self.event_publisher,
                Event::TrustUpdated(TrustUpdatedEvent {
                    timestamp: SystemTime::now(),
                    federation: *federation,
                    score,
                }),
            );
        }
    }
}
