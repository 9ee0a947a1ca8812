//! Verification Auction - pay verifiers to check data blocks
//!
//! Data blocks are put up for verification with a reward that grows along a
//! logistic curve between the block's creation time and its deadline.
//! Verifiers post an asking price; an auction round hands each eligible block
//! to the first verifier whose ask the current reward meets.
//!
//! # How it works
//!
//! 1. A block is registered with its price, reward rates, bounds and deadline
//! 2. Verifiers register with an asking price (or present a credential)
//! 3. Auction rounds run on a fixed tick and award blocks whose reward meets a bid
//! 4. The winner's score grows by the reward; the block stays verified
//!
//! Separately, verification requests are routed to a credentialed verifier
//! chosen deterministically from the request's hash, queued there, and
//! settled when the verifier reports a result.

pub mod block;
pub mod clock;
pub mod config;
pub mod device;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod hashing;
pub mod request;
pub mod reward;
pub mod router;
pub mod server;
pub mod service;
pub mod signing;
pub mod storage;
pub mod verifier;

pub use block::{BlockId, BlockParams, BlockState, DataBlock};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{AuctionConfig, Config, SigningBackend, SigningConfig};
pub use device::{CommandChannel, HardwareSigner, StreamChannel};
pub use engine::{AcceptanceRule, AuctionEngine, Award, LoopSummary, RoundSummary, StopReason};
pub use error::{AuctionError, DeviceError, Result};
pub use hashing::{file_digest, HashAlgorithm};
pub use request::{RequestId, RequestStatus, VerificationRequest};
pub use reward::{logistic, reward};
pub use router::{Registration, RequestRouter};
pub use service::AuctionService;
pub use signing::{SignatureService, Sr25519Keyring};
pub use storage::{AuctionSnapshot, AuctionStore, MemoryStore, SqliteStore};
pub use verifier::{Credential, SharedVerifiers, Verifier, VerifierId, VerifierSet};
