//! Send results and aggregation
//!
//! Every recipient of a send gets exactly one [`SendMessageResult`], success
//! or not, so callers can record partial failure without inspecting errors.
//! Only batch-level conditions (cancellation, server rejection) surface as
//! errors instead of results.

use crate::errors::ProofRequired;
use crate::types::{DeviceId, ServiceAddress};

// ----------------------------------------------------------------------------
// Per-Recipient Results
// ----------------------------------------------------------------------------

/// Outcome of a send to one recipient
#[derive(Debug, Clone, PartialEq)]
pub enum SendStatus {
    Success {
        /// Delivered anonymously
        unidentified: bool,
        /// A sync transcript should follow this send
        needs_sync: bool,
        /// Wall-clock send duration
        duration_millis: u64,
        /// Devices the message was delivered to
        devices: Vec<DeviceId>,
    },
    /// Transient transport failure; retryable by the caller
    NetworkFailure,
    /// The account no longer exists; not retryable
    UnregisteredFailure,
    /// The recipient's identity key changed; requires user confirmation
    IdentityFailure { identity_key: Vec<u8> },
    /// The server demanded proof of humanity before accepting the send
    ProofRequiredFailure(ProofRequired),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageResult {
    pub address: ServiceAddress,
    pub status: SendStatus,
}

impl SendMessageResult {
    pub fn success(
        address: ServiceAddress,
        devices: Vec<DeviceId>,
        unidentified: bool,
        needs_sync: bool,
        duration_millis: u64,
    ) -> Self {
        Self {
            address,
            status: SendStatus::Success {
                unidentified,
                needs_sync,
                duration_millis,
                devices,
            },
        }
    }

    pub fn network_failure(address: ServiceAddress) -> Self {
        Self {
            address,
            status: SendStatus::NetworkFailure,
        }
    }

    pub fn unregistered(address: ServiceAddress) -> Self {
        Self {
            address,
            status: SendStatus::UnregisteredFailure,
        }
    }

    pub fn identity_failure(address: ServiceAddress, identity_key: Vec<u8>) -> Self {
        Self {
            address,
            status: SendStatus::IdentityFailure { identity_key },
        }
    }

    pub fn proof_required(address: ServiceAddress, proof: ProofRequired) -> Self {
        Self {
            address,
            status: SendStatus::ProofRequiredFailure(proof),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, SendStatus::Success { .. })
    }

    pub fn is_network_failure(&self) -> bool {
        matches!(self.status, SendStatus::NetworkFailure)
    }

    pub fn is_unregistered(&self) -> bool {
        matches!(self.status, SendStatus::UnregisteredFailure)
    }

    /// Whether this result carries the delivered-anonymously marker
    pub fn was_unidentified(&self) -> bool {
        matches!(
            self.status,
            SendStatus::Success {
                unidentified: true,
                ..
            }
        )
    }
}

// ----------------------------------------------------------------------------
// Aggregation
// ----------------------------------------------------------------------------

/// The collected results of a multi-recipient send
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SendOutcome {
    pub results: Vec<SendMessageResult>,
}

impl SendOutcome {
    pub fn new(results: Vec<SendMessageResult>) -> Self {
        Self { results }
    }

    pub fn successes(&self) -> impl Iterator<Item = &SendMessageResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &SendMessageResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn complete_success(&self) -> bool {
        self.results.iter().all(SendMessageResult::is_success)
    }

    /// Whether any delivery asked for a sync transcript
    pub fn needs_sync(&self) -> bool {
        self.results.iter().any(|r| {
            matches!(
                r.status,
                SendStatus::Success {
                    needs_sync: true,
                    ..
                }
            )
        })
    }
}

/// Recipients from an earlier failed send that this send has now reached.
/// Used to clear per-recipient failure state after a retry that targeted a
/// superset or subset of the original audience.
pub fn resolved_failures(
    previously_failed: &[ServiceAddress],
    results: &[SendMessageResult],
) -> Vec<ServiceAddress> {
    previously_failed
        .iter()
        .filter(|failed| {
            results
                .iter()
                .any(|r| r.is_success() && r.address.matches(failed))
        })
        .cloned()
        .collect()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Aci;

    fn address() -> ServiceAddress {
        ServiceAddress::from_aci(Aci::generate())
    }

    #[test]
    fn test_outcome_aggregation() {
        let good = address();
        let bad = address();
        let outcome = SendOutcome::new(vec![
            SendMessageResult::success(good, vec![DeviceId::PRIMARY], true, true, 12),
            SendMessageResult::network_failure(bad),
        ]);

        assert!(!outcome.complete_success());
        assert!(outcome.needs_sync());
        assert_eq!(outcome.successes().count(), 1);
        assert_eq!(outcome.failures().count(), 1);
    }

    #[test]
    fn test_resolved_failures_intersects_successes() {
        let recovered = address();
        let still_failing = address();
        let untargeted = address();

        let results = vec![
            SendMessageResult::success(recovered.clone(), vec![DeviceId::PRIMARY], false, false, 3),
            SendMessageResult::network_failure(still_failing.clone()),
        ];

        let resolved = resolved_failures(
            &[recovered.clone(), still_failing, untargeted],
            &results,
        );
        assert_eq!(resolved, vec![recovered]);
    }
}
