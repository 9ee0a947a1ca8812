//! Out-of-band verification requests

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::encoding::hex_bytes;

/// Opaque request identifier: 16 random bytes, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request status. Anything other than the three known values is kept
/// verbatim so callers can attach their own outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Other(String),
}

impl RequestStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Other(s) => s,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl From<String> for RequestStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => Self::Pending,
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for RequestStatus {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<RequestStatus> for String {
    fn from(value: RequestStatus) -> Self {
        match value {
            RequestStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub request_id: RequestId,
    #[serde(with = "hex_bytes")]
    pub requester_public_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub verifier_public_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub verification_hash: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub hash_signature: Vec<u8>,
    pub status: RequestStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique_hex() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(hex::decode(a.as_str()).is_ok());
    }

    #[test]
    fn test_status_string_mapping() {
        assert_eq!(RequestStatus::from("pending"), RequestStatus::Pending);
        assert_eq!(RequestStatus::from("accepted"), RequestStatus::Accepted);
        assert_eq!(RequestStatus::from("rejected"), RequestStatus::Rejected);
        assert_eq!(
            RequestStatus::from("needs-review"),
            RequestStatus::Other("needs-review".to_string())
        );
        assert_eq!(String::from(RequestStatus::Accepted), "accepted");
    }

    #[test]
    fn test_request_json_shape() {
        let request = VerificationRequest {
            request_id: RequestId::from("abc"),
            requester_public_key: vec![0x01, 0x02],
            verifier_public_key: vec![0xff],
            verification_hash: vec![0xde, 0xad],
            hash_signature: vec![],
            status: RequestStatus::Other("escalated".to_string()),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["request_id"], "abc");
        assert_eq!(json["requester_public_key"], "0102");
        assert_eq!(json["verification_hash"], "dead");
        assert_eq!(json["status"], "escalated");

        let back: VerificationRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }
}
