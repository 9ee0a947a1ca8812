//! Deterministic routing of verification requests
//!
//! A routing hash is read as a big-endian unsigned integer and reduced modulo
//! the number of credentialed verifiers. The same hash against the same
//! verifier set always lands on the same verifier.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AuctionError, Result};
use crate::request::{RequestId, RequestStatus, VerificationRequest};
use crate::signing::SignatureService;
use crate::verifier::{Credential, SharedVerifiers, Verifier};

/// Result of presenting a credential to the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub verifier: Verifier,
    /// `false` when the credential was already known.
    pub created: bool,
    /// Oldest request still pending on a returning verifier.
    pub pending: Option<VerificationRequest>,
}

/// `hash mod modulus`, treating `hash` as a big-endian integer of any length.
pub fn route_index(hash: &[u8], modulus: usize) -> Option<usize> {
    if modulus == 0 {
        return None;
    }
    let m = modulus as u128;
    let rem = hash
        .iter()
        .fold(0u128, |acc, &byte| ((acc << 8) | byte as u128) % m);
    Some(rem as usize)
}

pub struct RequestRouter {
    verifiers: SharedVerifiers,
}

impl RequestRouter {
    pub fn new(verifiers: SharedVerifiers) -> Self {
        Self { verifiers }
    }

    /// Return the verifier holding `credential`, creating one on first sight.
    pub fn register_credential(&self, credential: Credential) -> Registration {
        let mut verifiers = self.verifiers.lock();
        let (verifier, created) = verifiers.upsert_credential(credential);
        let pending = if created {
            None
        } else {
            verifier.oldest_pending().cloned()
        };

        if created {
            info!(
                "Registered verifier {} (session {})",
                verifier.verifier_id, verifier.session_id
            );
        } else {
            debug!(
                "Verifier {} re-registered with {} pending requests",
                verifier.verifier_id,
                verifier.pending_count()
            );
        }

        Registration {
            verifier: verifier.clone(),
            created,
            pending,
        }
    }

    pub fn select_verifier(&self, routing_hash: &[u8]) -> Result<Verifier> {
        let verifiers = self.verifiers.lock();
        let index =
            route_index(routing_hash, verifiers.routable_len()).ok_or(AuctionError::NoVerifiers)?;
        verifiers
            .routable_at(index)
            .cloned()
            .ok_or(AuctionError::NoVerifiers)
    }

    /// Build a fresh pending request. Touches no shared state.
    pub fn create_request(
        requester_public_key: &[u8],
        verifier_public_key: &[u8],
        verification_hash: &[u8],
        hash_signature: &[u8],
    ) -> VerificationRequest {
        VerificationRequest {
            request_id: RequestId::generate(),
            requester_public_key: requester_public_key.to_vec(),
            verifier_public_key: verifier_public_key.to_vec(),
            verification_hash: verification_hash.to_vec(),
            hash_signature: hash_signature.to_vec(),
            status: RequestStatus::Pending,
        }
    }

    /// Route a request for `routing_hash` and queue it on the chosen verifier.
    pub fn submit_verification(
        &self,
        requester_public_key: &[u8],
        routing_hash: &[u8],
        hash_signature: &[u8],
    ) -> Result<VerificationRequest> {
        let mut verifiers = self.verifiers.lock();
        let index =
            route_index(routing_hash, verifiers.routable_len()).ok_or(AuctionError::NoVerifiers)?;
        let verifier = verifiers
            .routable_mut(index)
            .ok_or(AuctionError::NoVerifiers)?;
        let verifier_key = verifier
            .credential
            .as_ref()
            .map(|c| c.as_bytes().to_vec())
            .unwrap_or_default();

        let request = Self::create_request(
            requester_public_key,
            &verifier_key,
            routing_hash,
            hash_signature,
        );
        verifier.requests.push(request.clone());

        info!(
            "Routed request {} to verifier {} ({} queued)",
            request.request_id,
            verifier.verifier_id,
            verifier.requests.len()
        );
        Ok(request)
    }

    /// Overwrite the status of `request_id`. Returns `false` if no verifier
    /// holds such a request.
    pub fn update_status(&self, request_id: &RequestId, status: RequestStatus) -> bool {
        let mut verifiers = self.verifiers.lock();
        match verifiers.find_request_mut(request_id) {
            Some(request) => {
                debug!("Request {}: {} -> {}", request_id, request.status, status);
                request.status = status;
                true
            }
            None => {
                warn!("Status update for unknown request {}", request_id);
                false
            }
        }
    }

    pub fn request(&self, request_id: &RequestId) -> Option<VerificationRequest> {
        self.verifiers.lock().find_request(request_id).cloned()
    }

    /// Queue of the verifier holding `credential`, oldest first.
    pub fn requests_for(&self, credential: &Credential) -> Result<Vec<VerificationRequest>> {
        self.verifiers
            .lock()
            .by_credential(credential)
            .map(|v| v.requests.clone())
            .ok_or_else(|| {
                AuctionError::NotFound(format!(
                    "verifier with credential {}",
                    hex::encode(credential.as_bytes())
                ))
            })
    }

    /// Check a request's signature with `signer` and record the outcome.
    ///
    /// The registry lock is released while the collaborator runs. A device
    /// failure leaves the status untouched.
    pub fn check_signature(
        &self,
        request_id: &RequestId,
        signer: &dyn SignatureService,
    ) -> Result<RequestStatus> {
        let request = self
            .request(request_id)
            .ok_or_else(|| AuctionError::NotFound(format!("request {}", request_id)))?;

        let valid = signer.verify(
            &request.requester_public_key,
            &request.hash_signature,
            &request.verification_hash,
        )?;
        let status = if valid {
            RequestStatus::Accepted
        } else {
            RequestStatus::Rejected
        };

        if !self.update_status(request_id, status.clone()) {
            return Err(AuctionError::NotFound(format!("request {}", request_id)));
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::verifier::VerifierSet;
    use proptest::prelude::*;

    fn router_with(credentials: &[&[u8]]) -> RequestRouter {
        let router = RequestRouter::new(VerifierSet::new().shared());
        for c in credentials {
            router.register_credential(Credential::new(c.to_vec()));
        }
        router
    }

    struct FixedAnswer(std::result::Result<bool, ()>);

    impl SignatureService for FixedAnswer {
        fn sign(&self, key_id: u8, _hash: &[u8]) -> std::result::Result<Vec<u8>, DeviceError> {
            Err(DeviceError::UnknownKey(key_id))
        }

        fn verify(
            &self,
            _public_key: &[u8],
            _signature: &[u8],
            _hash: &[u8],
        ) -> std::result::Result<bool, DeviceError> {
            self.0.map_err(|_| DeviceError::ZeroResponse { command: "VS" })
        }
    }

    #[test]
    fn test_route_index_big_endian() {
        assert_eq!(route_index(&[], 3), Some(0));
        assert_eq!(route_index(&[0x01, 0x00], 7), Some(256 % 7));
        assert_eq!(route_index(&[0xff; 40], 1), Some(0));
        assert_eq!(route_index(&[0x05], 0), None);

        // 2^64 + 5 mod 1_000_003, computed without overflow
        let mut hash = vec![0x01];
        hash.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0x05]);
        let expected = ((1u128 << 64) + 5) % 1_000_003;
        assert_eq!(route_index(&hash, 1_000_003), Some(expected as usize));
    }

    #[test]
    fn test_select_verifier_uses_registration_order() {
        let router = router_with(&[b"alice", b"bob", b"carol"]);
        let v = router.select_verifier(&[0x04]).unwrap();
        assert_eq!(v.credential, Some(Credential::new(b"bob".to_vec())));
    }

    #[test]
    fn test_select_verifier_empty_set() {
        let router = router_with(&[]);
        assert!(matches!(
            router.select_verifier(&[0x01]),
            Err(AuctionError::NoVerifiers)
        ));
    }

    #[test]
    fn test_submit_without_verifiers_creates_nothing() {
        let router = router_with(&[]);
        let err = router
            .submit_verification(b"requester", &[0xab], b"sig")
            .unwrap_err();
        assert!(matches!(err, AuctionError::NoVerifiers));
        assert!(router.verifiers.lock().is_empty());
    }

    #[test]
    fn test_submit_appends_to_selected_queue() {
        let router = router_with(&[b"alice", b"bob"]);

        let first = router
            .submit_verification(b"req", &[0x01], b"sig-1")
            .unwrap();
        let second = router
            .submit_verification(b"req", &[0x03], b"sig-2")
            .unwrap();

        assert_eq!(first.verifier_public_key, b"bob".to_vec());
        assert_eq!(first.verification_hash, vec![0x01]);
        assert_eq!(first.status, RequestStatus::Pending);

        let queue = router
            .requests_for(&Credential::new(b"bob".to_vec()))
            .unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].request_id, first.request_id);
        assert_eq!(queue[1].request_id, second.request_id);
        assert!(router
            .requests_for(&Credential::new(b"alice".to_vec()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_create_request_has_no_side_effects() {
        let router = router_with(&[b"alice"]);
        let request = RequestRouter::create_request(b"r", b"alice", &[1], b"s");
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(router.request(&request.request_id).is_none());
    }

    #[test]
    fn test_update_status_is_idempotent() {
        let router = router_with(&[b"alice"]);
        let request = router.submit_verification(b"r", &[0x00], b"s").unwrap();

        assert!(router.update_status(&request.request_id, RequestStatus::Accepted));
        assert!(router.update_status(&request.request_id, RequestStatus::Accepted));
        assert_eq!(
            router.request(&request.request_id).unwrap().status,
            RequestStatus::Accepted
        );

        assert!(!router.update_status(&RequestId::from("missing"), RequestStatus::Rejected));
    }

    #[test]
    fn test_reregistration_surfaces_oldest_pending() {
        let router = router_with(&[b"alice"]);
        let first = router.submit_verification(b"r", &[0x00], b"s1").unwrap();
        let second = router.submit_verification(b"r", &[0x01], b"s2").unwrap();

        let again = router.register_credential(Credential::new(b"alice".to_vec()));
        assert!(!again.created);
        assert_eq!(again.pending.unwrap().request_id, first.request_id);

        router.update_status(&first.request_id, RequestStatus::Rejected);
        let again = router.register_credential(Credential::new(b"alice".to_vec()));
        assert_eq!(again.pending.unwrap().request_id, second.request_id);
    }

    #[test]
    fn test_new_registration_has_no_pending() {
        let router = router_with(&[]);
        let reg = router.register_credential(Credential::new(b"dave".to_vec()));
        assert!(reg.created);
        assert!(reg.pending.is_none());
        assert_eq!(reg.verifier.bid_price, None);
    }

    #[test]
    fn test_check_signature_records_outcome() {
        let router = router_with(&[b"alice"]);
        let request = router.submit_verification(b"r", &[0x00], b"s").unwrap();

        let status = router
            .check_signature(&request.request_id, &FixedAnswer(Ok(false)))
            .unwrap();
        assert_eq!(status, RequestStatus::Rejected);

        let status = router
            .check_signature(&request.request_id, &FixedAnswer(Ok(true)))
            .unwrap();
        assert_eq!(status, RequestStatus::Accepted);
    }

    #[test]
    fn test_check_signature_device_failure_keeps_status() {
        let router = router_with(&[b"alice"]);
        let request = router.submit_verification(b"r", &[0x00], b"s").unwrap();

        let err = router
            .check_signature(&request.request_id, &FixedAnswer(Err(())))
            .unwrap_err();
        assert!(matches!(err, AuctionError::Device(_)));
        assert_eq!(
            router.request(&request.request_id).unwrap().status,
            RequestStatus::Pending
        );
    }

    proptest! {
        #[test]
        fn prop_selection_is_deterministic(
            hash in proptest::collection::vec(any::<u8>(), 0..64),
            count in 1usize..20,
        ) {
            let router = RequestRouter::new(VerifierSet::new().shared());
            for i in 0..count {
                router.register_credential(Credential::new(vec![i as u8, 0xee]));
            }
            let a = router.select_verifier(&hash).unwrap();
            let b = router.select_verifier(&hash).unwrap();
            prop_assert_eq!(a.verifier_id, b.verifier_id);
        }
    }
}
