//! Verifiers and the registry shared by the auction engine and the router

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encoding::hex_bytes;
use crate::error::{AuctionError, Result};
use crate::request::{RequestId, VerificationRequest};

pub type VerifierId = u64;

/// Public-key credential identifying a verifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(#[serde(with = "hex_bytes")] Vec<u8>);

impl Credential {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verifier {
    pub verifier_id: VerifierId,
    pub session_id: String,
    pub credential: Option<Credential>,
    /// Asking price. `None` until the verifier places a bid; such verifiers
    /// are skipped by auction rounds.
    pub bid_price: Option<f64>,
    pub total_score: f64,
    /// Oldest first.
    pub requests: Vec<VerificationRequest>,
}

impl Verifier {
    fn new(verifier_id: VerifierId, credential: Option<Credential>, bid_price: Option<f64>) -> Self {
        Self {
            verifier_id,
            session_id: Uuid::new_v4().to_string(),
            credential,
            bid_price,
            total_score: 0.0,
            requests: Vec::new(),
        }
    }

    pub fn oldest_pending(&self) -> Option<&VerificationRequest> {
        self.requests.iter().find(|r| r.status.is_pending())
    }

    pub fn pending_count(&self) -> usize {
        self.requests.iter().filter(|r| r.status.is_pending()).count()
    }
}

pub(crate) fn validate_bid(bid_price: f64) -> Result<()> {
    if !bid_price.is_finite() || bid_price < 0.0 {
        return Err(AuctionError::Validation(format!(
            "bid_price must be a non-negative number, got {}",
            bid_price
        )));
    }
    Ok(())
}

/// Verifiers in registration order, indexed by id and by credential.
#[derive(Debug, Default)]
pub struct VerifierSet {
    verifiers: Vec<Verifier>,
    by_id: HashMap<VerifierId, usize>,
    by_credential: HashMap<Credential, usize>,
    /// Positions of credentialed verifiers, in registration order.
    routable: Vec<usize>,
}

/// Handle shared between [`crate::AuctionEngine`] and [`crate::RequestRouter`].
pub type SharedVerifiers = Arc<Mutex<VerifierSet>>;

impl VerifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedVerifiers {
        Arc::new(Mutex::new(self))
    }

    /// Rebuild the indexes from a persisted list.
    pub fn from_verifiers(verifiers: Vec<Verifier>) -> Result<Self> {
        let mut set = Self::new();
        for verifier in verifiers {
            set.push(verifier)?;
        }
        Ok(set)
    }

    fn push(&mut self, verifier: Verifier) -> Result<usize> {
        if self.by_id.contains_key(&verifier.verifier_id) {
            return Err(AuctionError::Validation(format!(
                "verifier id {} already registered",
                verifier.verifier_id
            )));
        }
        if let Some(credential) = &verifier.credential {
            if self.by_credential.contains_key(credential) {
                return Err(AuctionError::Validation(format!(
                    "credential {} already registered",
                    hex::encode(credential.as_bytes())
                )));
            }
        }

        let pos = self.verifiers.len();
        self.by_id.insert(verifier.verifier_id, pos);
        if let Some(credential) = &verifier.credential {
            self.by_credential.insert(credential.clone(), pos);
            self.routable.push(pos);
        }
        self.verifiers.push(verifier);
        Ok(pos)
    }

    /// One past the highest id in use. When the highest id is `u64::MAX`
    /// the lowest unused id is handed out instead.
    fn next_id(&self) -> VerifierId {
        let Some(&max) = self.by_id.keys().max() else {
            return 1;
        };
        if let Some(id) = max.checked_add(1) {
            return id;
        }
        let mut id: VerifierId = 1;
        while self.by_id.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        id
    }

    /// Add a bidding verifier under a caller-chosen id.
    pub fn insert_bidder(&mut self, verifier_id: VerifierId, bid_price: f64) -> Result<&Verifier> {
        validate_bid(bid_price)?;
        let pos = self.push(Verifier::new(verifier_id, None, Some(bid_price)))?;
        Ok(&self.verifiers[pos])
    }

    /// Return the verifier holding `credential`, creating it if needed.
    /// The flag is `true` when a new verifier was created.
    pub fn upsert_credential(&mut self, credential: Credential) -> (&Verifier, bool) {
        if let Some(&pos) = self.by_credential.get(&credential) {
            return (&self.verifiers[pos], false);
        }
        let id = self.next_id();
        let pos = self.verifiers.len();
        self.by_id.insert(id, pos);
        self.by_credential.insert(credential.clone(), pos);
        self.routable.push(pos);
        self.verifiers.push(Verifier::new(id, Some(credential), None));
        (&self.verifiers[pos], true)
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Verifier> {
        self.verifiers.iter()
    }

    pub fn get(&self, id: VerifierId) -> Option<&Verifier> {
        self.by_id.get(&id).map(|&pos| &self.verifiers[pos])
    }

    pub fn get_mut(&mut self, id: VerifierId) -> Option<&mut Verifier> {
        self.by_id.get(&id).map(|&pos| &mut self.verifiers[pos])
    }

    pub fn by_credential(&self, credential: &Credential) -> Option<&Verifier> {
        self.by_credential
            .get(credential)
            .map(|&pos| &self.verifiers[pos])
    }

    pub fn routable_len(&self) -> usize {
        self.routable.len()
    }

    /// The `index`-th credentialed verifier in registration order.
    pub fn routable_mut(&mut self, index: usize) -> Option<&mut Verifier> {
        let pos = *self.routable.get(index)?;
        self.verifiers.get_mut(pos)
    }

    pub fn routable_at(&self, index: usize) -> Option<&Verifier> {
        let pos = *self.routable.get(index)?;
        self.verifiers.get(pos)
    }

    pub fn find_request_mut(&mut self, request_id: &RequestId) -> Option<&mut VerificationRequest> {
        self.verifiers
            .iter_mut()
            .flat_map(|v| v.requests.iter_mut())
            .find(|r| &r.request_id == request_id)
    }

    pub fn find_request(&self, request_id: &RequestId) -> Option<&VerificationRequest> {
        self.verifiers
            .iter()
            .flat_map(|v| v.requests.iter())
            .find(|r| &r.request_id == request_id)
    }

    pub fn snapshot(&self) -> Vec<Verifier> {
        self.verifiers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_bidder_rejects_duplicate_id() {
        let mut set = VerifierSet::new();
        set.insert_bidder(1, 4.0).unwrap();
        assert!(matches!(
            set.insert_bidder(1, 5.0),
            Err(AuctionError::Validation(_))
        ));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_insert_bidder_rejects_negative_bid() {
        let mut set = VerifierSet::new();
        assert!(set.insert_bidder(1, -0.5).is_err());
        assert!(set.insert_bidder(1, f64::NAN).is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn test_credential_dedup() {
        let mut set = VerifierSet::new();
        let (first, created) = set.upsert_credential(Credential::new(vec![1, 2, 3]));
        assert!(created);
        let first_id = first.verifier_id;
        let first_session = first.session_id.clone();

        let (again, created) = set.upsert_credential(Credential::new(vec![1, 2, 3]));
        assert!(!created);
        assert_eq!(again.verifier_id, first_id);
        assert_eq!(again.session_id, first_session);
        assert_eq!(set.len(), 1);
        assert_eq!(set.routable_len(), 1);
    }

    #[test]
    fn test_credential_ids_skip_taken_ids() {
        let mut set = VerifierSet::new();
        set.insert_bidder(7, 1.0).unwrap();
        let (v, _) = set.upsert_credential(Credential::new(vec![9]));
        assert_eq!(v.verifier_id, 8);
        assert_eq!(v.bid_price, None);
    }

    #[test]
    fn test_credential_after_max_id_takes_free_slot() {
        let mut set = VerifierSet::new();
        set.insert_bidder(u64::MAX, 1.0).unwrap();
        set.insert_bidder(1, 1.0).unwrap();

        let (v, created) = set.upsert_credential(Credential::new(vec![0x42]));
        assert!(created);
        assert_eq!(v.verifier_id, 2);
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(1).unwrap().bid_price, Some(1.0));
        assert_eq!(set.get(u64::MAX).unwrap().bid_price, Some(1.0));
    }

    #[test]
    fn test_routable_only_counts_credentialed() {
        let mut set = VerifierSet::new();
        set.insert_bidder(1, 1.0).unwrap();
        set.upsert_credential(Credential::new(vec![0xaa]));
        set.insert_bidder(2, 1.0).unwrap();
        set.upsert_credential(Credential::new(vec![0xbb]));

        assert_eq!(set.len(), 4);
        assert_eq!(set.routable_len(), 2);
        assert_eq!(
            set.routable_at(1).unwrap().credential,
            Some(Credential::new(vec![0xbb]))
        );
    }

    #[test]
    fn test_from_verifiers_rebuilds_indexes() {
        let mut set = VerifierSet::new();
        set.insert_bidder(3, 2.0).unwrap();
        set.upsert_credential(Credential::new(vec![0x01]));

        let rebuilt = VerifierSet::from_verifiers(set.snapshot()).unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert!(rebuilt.get(3).is_some());
        assert!(rebuilt.by_credential(&Credential::new(vec![0x01])).is_some());
        assert_eq!(rebuilt.routable_len(), 1);
    }
}
