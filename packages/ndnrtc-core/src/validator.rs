//! Sample verification against signed manifests.
//!
//! Trust policy is the caller's: the engine takes a [`Verifier`] capability
//! and applies it to manifests and directly-signed metadata packets.
//! Individual segments carry digest-only signatures and are trusted iff
//! their implicit digest appears in the frame's verified manifest.
//!
//! Verification is asynchronous: each check runs as a task and its outcome
//! comes back as a [`ValidationEvent`] on the face task's channel. A failed
//! slot is still delivered to playout (dropping it would break liveness);
//! receivers filter on verification status if they choose.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::buffer::{BufferSlot, SlotState, VerificationStatus};
use crate::name::Name;
use crate::stats::{Indicator, StatisticsStorage};
use crate::transport::Data;

/// Caller-supplied validation capability.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// True iff `data` verifies against the caller's trust policy.
    async fn verify(&self, data: &Data) -> bool;
}

/// Accepts everything. Useful for tests and trust-less deployments.
pub struct AcceptAllVerifier;

#[async_trait]
impl Verifier for AcceptAllVerifier {
    async fn verify(&self, _data: &Data) -> bool {
        true
    }
}

/// Outcome of an asynchronous verification task.
#[derive(Debug, Clone)]
pub enum ValidationEvent {
    /// A frame manifest finished trust-policy verification.
    Manifest {
        slot_name: Name,
        content: bytes::Bytes,
        trusted: bool,
    },
    /// A directly-signed packet (stream/live meta, pointer) finished
    /// verification.
    Packet { name: Name, trusted: bool },
}

/// Verifies manifests for buffer slots and segments against them.
pub struct ManifestValidator {
    verifier: Arc<dyn Verifier>,
    events: mpsc::UnboundedSender<ValidationEvent>,
    stats: StatisticsStorage,
}

impl ManifestValidator {
    pub fn new(
        verifier: Arc<dyn Verifier>,
        events: mpsc::UnboundedSender<ValidationEvent>,
        stats: StatisticsStorage,
    ) -> Self {
        ManifestValidator {
            verifier,
            events,
            stats,
        }
    }

    /// Kicks off trust-policy verification of an arrived manifest. The
    /// result lands back on the face task as a
    /// [`ValidationEvent::Manifest`].
    pub fn manifest_arrived(&self, slot_name: Name, manifest: Data) {
        let verifier = Arc::clone(&self.verifier);
        let events = self.events.clone();
        tokio::spawn(async move {
            let trusted = verifier.verify(&manifest).await;
            if !trusted {
                log::warn!(
                    "[ManifestValidator] manifest verification failure for {} (key locator {:?})",
                    slot_name,
                    manifest.key_locator
                );
            }
            let _ = events.send(ValidationEvent::Manifest {
                slot_name,
                content: manifest.content,
                trusted,
            });
        });
    }

    /// Kicks off verification of a directly-signed packet.
    pub fn packet_arrived(&self, data: Data) {
        let verifier = Arc::clone(&self.verifier);
        let events = self.events.clone();
        tokio::spawn(async move {
            let trusted = verifier.verify(&data).await;
            let _ = events.send(ValidationEvent::Packet {
                name: data.name.clone(),
                trusted,
            });
        });
    }

    /// Applies a completed manifest verification to the slot: stores the
    /// manifest and, if the slot has assembled, checks every fetched
    /// segment's digest against it.
    pub fn apply_manifest(&self, slot: &mut BufferSlot, content: bytes::Bytes, trusted: bool) {
        slot.set_manifest(content, trusted);
        if slot.state() >= SlotState::Ready {
            self.verify_slot(slot);
        }
    }

    /// Digest-checks a fully assembled slot. Call again when a slot reaches
    /// Ready after its manifest already arrived.
    pub fn verify_slot(&self, slot: &mut BufferSlot) {
        if slot.verification_status() != VerificationStatus::Unknown || slot.manifest().is_none() {
            return;
        }
        match slot.verify_against_manifest() {
            VerificationStatus::Verified => {
                self.stats.inc(Indicator::VerifySuccess);
                log::debug!("[ManifestValidator] verified {}", slot.name());
            }
            VerificationStatus::Failed => {
                self.stats.inc(Indicator::VerifyFailure);
                log::error!(
                    "[ManifestValidator] slot verification failure {}",
                    slot.name()
                );
            }
            VerificationStatus::Unknown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;
    use crate::packets::SegmentsManifest;

    struct RejectAllVerifier;

    #[async_trait]
    impl Verifier for RejectAllVerifier {
        async fn verify(&self, _data: &Data) -> bool {
            false
        }
    }

    fn validator_with(
        verifier: Arc<dyn Verifier>,
    ) -> (
        ManifestValidator,
        mpsc::UnboundedReceiver<ValidationEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ManifestValidator::new(verifier, tx, StatisticsStorage::consumer()),
            rx,
        )
    }

    #[tokio::test]
    async fn trusted_manifest_event_reaches_the_face_task() {
        let (validator, mut rx) = validator_with(Arc::new(AcceptAllVerifier));
        let mut segment = Data::new(Name::from("/s/seg"));
        segment.set_content(vec![1, 2, 3]);
        let manifest = SegmentsManifest::pack(Name::from("/s/manifest"), &[&segment]);

        validator.manifest_arrived(Name::from("/s/slot"), manifest.clone());

        let ev = rx.recv().await.expect("validation event");
        match ev {
            ValidationEvent::Manifest {
                slot_name,
                content,
                trusted,
            } => {
                assert_eq!(slot_name, Name::from("/s/slot"));
                assert_eq!(content, manifest.content);
                assert!(trusted);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejected_manifest_marks_slot_failed_but_keeps_it() {
        let (validator, mut rx) = validator_with(Arc::new(RejectAllVerifier));
        let manifest = Data::new(Name::from("/s/manifest"));
        validator.manifest_arrived(Name::from("/s/slot"), manifest);

        let ev = rx.recv().await.unwrap();
        let ValidationEvent::Manifest {
            content, trusted, ..
        } = ev
        else {
            panic!("wrong event kind");
        };
        assert!(!trusted);

        let mut slot = BufferSlot::new();
        validator.apply_manifest(&mut slot, content, trusted);
        assert_eq!(slot.verification_status(), VerificationStatus::Unknown);
        // the slot itself stays usable; verification resolves at Ready
        assert!(slot.manifest().is_some());
    }

    #[tokio::test]
    async fn packet_verification_round_trips() {
        let (validator, mut rx) = validator_with(Arc::new(AcceptAllVerifier));
        let mut meta = Data::new(Name::from("/s/_meta"));
        meta.set_content(vec![0u8; 4]);
        validator.packet_arrived(meta);

        match rx.recv().await.unwrap() {
            ValidationEvent::Packet { name, trusted } => {
                assert_eq!(name, Name::from("/s/_meta"));
                assert!(trusted);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
