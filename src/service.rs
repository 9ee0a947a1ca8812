//! Auction service
//!
//! Wires the engine, the router and the persistence store together. Every
//! mutating call persists a fresh snapshot once the in-memory locks have been
//! released. Snapshots reach the store in the order they were taken.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tracing::{error, info};

use crate::block::{BlockId, BlockParams, BlockState, DataBlock};
use crate::clock::Clock;
use crate::config::AuctionConfig;
use crate::engine::{AuctionEngine, LoopSummary, RoundSummary, StopReason};
use crate::error::{AuctionError, Result};
use crate::request::{RequestId, RequestStatus, VerificationRequest};
use crate::router::{Registration, RequestRouter};
use crate::signing::SignatureService;
use crate::storage::AuctionStore;
use crate::verifier::{Credential, Verifier, VerifierId, VerifierSet};

pub struct AuctionService {
    engine: AuctionEngine,
    router: RequestRouter,
    store: Arc<dyn AuctionStore>,
    signer: Option<Arc<dyn SignatureService>>,
    config: AuctionConfig,
    shutdown: watch::Sender<bool>,
    /// Held across snapshot and write. Taken before any engine lock.
    persist_lock: Mutex<()>,
}

impl AuctionService {
    /// Build the service and restore whatever `store` last persisted.
    pub fn open(
        config: AuctionConfig,
        store: Arc<dyn AuctionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let verifiers = VerifierSet::new().shared();
        let engine = AuctionEngine::new(&config, verifiers.clone(), clock);
        let router = RequestRouter::new(verifiers);

        let snapshot = store.load()?;
        if !snapshot.is_empty() {
            engine.restore(snapshot)?;
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            engine,
            router,
            store,
            signer: None,
            config,
            shutdown,
            persist_lock: Mutex::new(()),
        })
    }

    /// Attach the collaborator used by [`Self::check_signature`].
    pub fn with_signer(mut self, signer: Arc<dyn SignatureService>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn config(&self) -> &AuctionConfig {
        &self.config
    }

    pub fn engine(&self) -> &AuctionEngine {
        &self.engine
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock();
        self.store.persist(&self.engine.snapshot())
    }

    // ------------------------------------------------------------------
    // Blocks and bids
    // ------------------------------------------------------------------

    pub fn register_block(&self, params: BlockParams) -> Result<DataBlock> {
        let block = self.engine.register_block(params)?;
        self.persist()?;
        Ok(block)
    }

    pub fn register_verifier(&self, verifier_id: VerifierId, bid_price: f64) -> Result<Verifier> {
        let verifier = self.engine.register_verifier(verifier_id, bid_price)?;
        self.persist()?;
        Ok(verifier)
    }

    pub fn update_bid(&self, verifier_id: VerifierId, bid_price: f64) -> Result<Verifier> {
        let verifier = self.engine.update_bid(verifier_id, bid_price)?;
        self.persist()?;
        Ok(verifier)
    }

    pub fn blocks(&self) -> Vec<DataBlock> {
        self.engine.blocks()
    }

    pub fn block_state(&self, block_id: BlockId) -> Result<BlockState> {
        self.engine.block_state(block_id, self.engine.now())
    }

    pub fn verifiers(&self) -> Vec<Verifier> {
        self.engine.verifiers()
    }

    pub fn leaderboard(&self) -> Vec<Verifier> {
        self.engine.leaderboard()
    }

    /// Run a single auction round at the current time.
    pub fn tick(&self) -> Result<RoundSummary> {
        let round = self.engine.run_auction_round(self.engine.now())?;
        if !round.awards.is_empty() {
            self.persist()?;
        }
        Ok(round)
    }

    /// One bounded auction loop using the configured timing. Stops early
    /// when [`Self::shutdown`] is called. Rounds with awards are persisted
    /// as they finish.
    pub async fn run_auction_loop(&self) -> Result<LoopSummary> {
        self.engine
            .run_auction_loop_with(
                self.config.round_duration(),
                self.config.tick_interval(),
                self.shutdown.subscribe(),
                |round| {
                    if round.awards.is_empty() {
                        return Ok(());
                    }
                    run_blocking(|| self.persist())
                },
            )
            .await
    }

    /// Keep auction loops going until shutdown. Between loops the service
    /// idles for one tick so new blocks get picked up.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            match self.run_auction_loop().await {
                Ok(summary) if summary.stop == StopReason::Cancelled => return,
                Ok(_) => {}
                Err(e) => error!("Auction loop failed: {}", e),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval()) => {}
                _ = shutdown.changed() => return,
            }
            if *shutdown.borrow() {
                return;
            }
        }
    }

    /// Stop running loops at their next tick boundary and persist.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown.send_replace(true);
        self.persist()?;
        info!("Auction service stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Verification requests
    // ------------------------------------------------------------------

    pub fn register_credential(&self, credential: Credential) -> Result<Registration> {
        let registration = self.router.register_credential(credential);
        if registration.created {
            self.persist()?;
        }
        Ok(registration)
    }

    pub fn submit_verification(
        &self,
        requester_public_key: &[u8],
        verification_hash: &[u8],
        hash_signature: &[u8],
    ) -> Result<VerificationRequest> {
        let request =
            self.router
                .submit_verification(requester_public_key, verification_hash, hash_signature)?;
        self.persist()?;
        Ok(request)
    }

    /// Record the outcome a verifier reports for `request_id`.
    pub fn report_result(&self, request_id: &RequestId, status: RequestStatus) -> Result<()> {
        if !self.router.update_status(request_id, status) {
            return Err(AuctionError::NotFound(format!("request {}", request_id)));
        }
        self.persist()
    }

    /// Let the attached signing collaborator settle a request.
    pub fn check_signature(&self, request_id: &RequestId) -> Result<RequestStatus> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            AuctionError::Validation("no signature service configured".to_string())
        })?;
        let status = self.router.check_signature(request_id, signer.as_ref())?;
        self.persist()?;
        Ok(status)
    }

    pub fn request(&self, request_id: &RequestId) -> Result<VerificationRequest> {
        self.router
            .request(request_id)
            .ok_or_else(|| AuctionError::NotFound(format!("request {}", request_id)))
    }

    pub fn requests_for(&self, credential: &Credential) -> Result<Vec<VerificationRequest>> {
        self.router.requests_for(credential)
    }
}

/// Run store or device work from async code. On a multi-threaded runtime the
/// worker thread is handed over to blocking duty first.
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
