//! Verification Auction Server
//!
//! HTTP surface over [`AuctionService`].

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::block::{BlockParams, BlockState, DataBlock};
use crate::config::{AuctionConfig, Config};
use crate::encoding::hex_bytes;
use crate::engine::RoundSummary;
use crate::error::AuctionError;
use crate::request::{RequestId, RequestStatus, VerificationRequest};
use crate::reward;
use crate::router::Registration;
use crate::service::AuctionService;
use crate::verifier::{Credential, Verifier, VerifierId};

pub struct AppState {
    pub service: Arc<AuctionService>,
    pub started_at: std::time::Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/config", get(config_handler))
        .route("/blocks", get(list_blocks_handler).post(create_block_handler))
        .route(
            "/verifiers",
            get(list_verifiers_handler).post(create_verifier_handler),
        )
        .route("/verifiers/credential", post(register_credential_handler))
        .route("/verifiers/:id/bid", post(update_bid_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route("/verify", post(submit_verification_handler))
        .route("/requests/:id", get(get_request_handler))
        .route("/requests/:id/status", post(report_status_handler))
        .route("/requests/:id/check", post(check_signature_handler))
        .route("/auction/tick", post(tick_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// [`AuctionError`] rendered as `{"error": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub AuctionError);

impl From<AuctionError> for ApiError {
    fn from(e: AuctionError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AuctionError::Validation(_) => StatusCode::BAD_REQUEST,
            AuctionError::NotFound(_) => StatusCode::NOT_FOUND,
            AuctionError::NoVerifiers => StatusCode::CONFLICT,
            AuctionError::Device(_) => StatusCode::BAD_GATEWAY,
            AuctionError::Domain(_)
            | AuctionError::Storage(_)
            | AuctionError::Io(_)
            | AuctionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run a service call that persists or talks to the signing device on the
/// blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AuctionService) -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| AuctionError::Internal(format!("worker task failed: {}", e)))?
        .map_err(ApiError::from)
}

// ============================================================================
// Health and config
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub uptime_secs: u64,
    pub version: String,
    pub blocks: usize,
    pub verifiers: usize,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        blocks: state.service.blocks().len(),
        verifiers: state.service.verifiers().len(),
    })
}

async fn config_handler(State(state): State<Arc<AppState>>) -> Json<AuctionConfig> {
    Json(state.service.config().clone())
}

// ============================================================================
// Blocks
// ============================================================================

/// A block with its state and, while active, the reward it pays right now.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockView {
    #[serde(flatten)]
    pub block: DataBlock,
    pub state: BlockState,
    pub current_reward: Option<f64>,
}

async fn list_blocks_handler(State(state): State<Arc<AppState>>) -> Json<Vec<BlockView>> {
    let now = state.service.engine().now();
    let views = state
        .service
        .blocks()
        .into_iter()
        .map(|block| {
            let state = block.state(now);
            let current_reward = match state {
                BlockState::Active => reward::reward(&block, now).ok(),
                _ => None,
            };
            BlockView {
                block,
                state,
                current_reward,
            }
        })
        .collect();
    Json(views)
}

async fn create_block_handler(
    State(state): State<Arc<AppState>>,
    Json(params): Json<BlockParams>,
) -> Result<(StatusCode, Json<DataBlock>), ApiError> {
    let block = blocking(&state, move |service| service.register_block(params)).await?;
    Ok((StatusCode::CREATED, Json(block)))
}

// ============================================================================
// Verifiers
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct NewVerifier {
    pub verifier_id: VerifierId,
    pub bid_price: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BidUpdate {
    pub bid_price: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub credential: Credential,
}

async fn list_verifiers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Verifier>> {
    Json(state.service.verifiers())
}

async fn create_verifier_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewVerifier>,
) -> Result<(StatusCode, Json<Verifier>), ApiError> {
    let verifier = blocking(&state, move |service| {
        service.register_verifier(body.verifier_id, body.bid_price)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(verifier)))
}

async fn update_bid_handler(
    State(state): State<Arc<AppState>>,
    Path(verifier_id): Path<VerifierId>,
    Json(body): Json<BidUpdate>,
) -> ApiResult<Verifier> {
    let verifier = blocking(&state, move |service| {
        service.update_bid(verifier_id, body.bid_price)
    })
    .await?;
    Ok(Json(verifier))
}

async fn register_credential_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialRequest>,
) -> ApiResult<Registration> {
    let registration =
        blocking(&state, move |service| service.register_credential(body.credential)).await?;
    Ok(Json(registration))
}

async fn leaderboard_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Verifier>> {
    Json(state.service.leaderboard())
}

// ============================================================================
// Verification requests
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitVerification {
    #[serde(with = "hex_bytes")]
    pub requester_public_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub verification_hash: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub hash_signature: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: RequestStatus,
}

async fn submit_verification_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitVerification>,
) -> Result<(StatusCode, Json<VerificationRequest>), ApiError> {
    let request = blocking(&state, move |service| {
        service.submit_verification(
            &body.requester_public_key,
            &body.verification_hash,
            &body.hash_signature,
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_request_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<VerificationRequest> {
    Ok(Json(state.service.request(&RequestId::from(request_id))?))
}

async fn report_status_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    Json(body): Json<StatusReport>,
) -> ApiResult<VerificationRequest> {
    let request = blocking(&state, move |service| {
        let request_id = RequestId::from(request_id);
        service.report_result(&request_id, body.status)?;
        service.request(&request_id)
    })
    .await?;
    Ok(Json(request))
}

async fn check_signature_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<StatusReport> {
    let status = blocking(&state, move |service| {
        service.check_signature(&RequestId::from(request_id))
    })
    .await?;
    Ok(Json(StatusReport { status }))
}

// ============================================================================
// Auction
// ============================================================================

async fn tick_handler(State(state): State<Arc<AppState>>) -> ApiResult<RoundSummary> {
    Ok(Json(blocking(&state, |service| service.tick()).await?))
}

/// Run the server until ctrl-c, with the auction loop in the background.
pub async fn run_server(config: &Config, service: Arc<AuctionService>) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        service: service.clone(),
        started_at: std::time::Instant::now(),
    });

    let auction = {
        let service = service.clone();
        tokio::spawn(async move { service.run().await })
    };

    let app = create_router(state);
    let addr = config.bind_address();

    info!("Starting Verification Auction server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    service.shutdown()?;
    if let Err(e) = auction.await {
        error!("Auction task ended abnormally: {}", e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::params;
    use crate::clock::ManualClock;
    use crate::signing::{SignatureService, Sr25519Keyring};
    use crate::storage::MemoryStore;

    const START: i64 = 1_700_000_000;

    fn app_state() -> Arc<AppState> {
        let service = AuctionService::open(
            AuctionConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(START)),
        )
        .unwrap();
        Arc::new(AppState {
            service: Arc::new(service),
            started_at: std::time::Instant::now(),
        })
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (AuctionError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AuctionError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AuctionError::NoVerifiers, StatusCode::CONFLICT),
            (AuctionError::Domain("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AuctionError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_block_lifecycle() {
        let state = app_state();

        let (status, Json(block)) =
            create_block_handler(State(state.clone()), Json(params(7, START + 60)))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(block.creation_time, START);

        let dup = create_block_handler(State(state.clone()), Json(params(7, START + 90)))
            .await
            .unwrap_err();
        assert_eq!(dup.status(), StatusCode::BAD_REQUEST);

        let Json(blocks) = list_blocks_handler(State(state.clone())).await;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].state, BlockState::Active);
        assert!(blocks[0].current_reward.is_some());
    }

    #[tokio::test]
    async fn test_bid_and_tick() {
        let state = app_state();
        create_block_handler(State(state.clone()), Json(params(1, START + 60)))
            .await
            .unwrap();
        create_verifier_handler(
            State(state.clone()),
            Json(NewVerifier {
                verifier_id: 1,
                bid_price: 50.0,
            }),
        )
        .await
        .unwrap();

        let Json(round) = tick_handler(State(state.clone())).await.unwrap();
        assert!(round.awards.is_empty());

        update_bid_handler(
            State(state.clone()),
            Path(1),
            Json(BidUpdate { bid_price: 0.5 }),
        )
        .await
        .unwrap();
        let Json(round) = tick_handler(State(state.clone())).await.unwrap();
        assert_eq!(round.awards.len(), 1);

        let Json(board) = leaderboard_handler(State(state.clone())).await;
        assert!(board[0].total_score > 0.0);

        let missing = update_bid_handler(State(state), Path(99), Json(BidUpdate { bid_price: 1.0 }))
            .await
            .unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_verification_round() {
        let state = app_state();

        let err = submit_verification_handler(
            State(state.clone()),
            Json(SubmitVerification {
                requester_public_key: vec![1],
                verification_hash: vec![2],
                hash_signature: vec![3],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let body: CredentialRequest = serde_json::from_str(r#"{"credential":"0xabcd"}"#).unwrap();
        let Json(registration) = register_credential_handler(State(state.clone()), Json(body))
            .await
            .unwrap();
        assert!(registration.created);

        let (_, Json(request)) = submit_verification_handler(
            State(state.clone()),
            Json(SubmitVerification {
                requester_public_key: vec![1],
                verification_hash: vec![2],
                hash_signature: vec![3],
            }),
        )
        .await
        .unwrap();
        assert_eq!(request.verifier_public_key, vec![0xab, 0xcd]);

        let Json(updated) = report_status_handler(
            State(state.clone()),
            Path(request.request_id.to_string()),
            Json(StatusReport {
                status: RequestStatus::Rejected,
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.status, RequestStatus::Rejected);

        let missing = get_request_handler(State(state), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_internal_error() {
        let state = app_state();
        let err = blocking(&state, |_| -> crate::error::Result<()> {
            panic!("worker died")
        })
        .await
        .unwrap_err();
        assert!(matches!(err.0, AuctionError::Internal(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_check_signature_route() {
        let keyring = Arc::new(Sr25519Keyring::new());
        let public = keyring.insert_seed(0, &[9u8; 32]).unwrap();
        let hash = [0x11u8; 32];
        let signature = keyring.sign(0, &hash).unwrap();

        let service = AuctionService::open(
            AuctionConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(START)),
        )
        .unwrap()
        .with_signer(keyring);
        let state = Arc::new(AppState {
            service: Arc::new(service),
            started_at: std::time::Instant::now(),
        });

        let body: CredentialRequest = serde_json::from_str(r#"{"credential":"0x01"}"#).unwrap();
        register_credential_handler(State(state.clone()), Json(body))
            .await
            .unwrap();
        let (_, Json(request)) = submit_verification_handler(
            State(state.clone()),
            Json(SubmitVerification {
                requester_public_key: public,
                verification_hash: hash.to_vec(),
                hash_signature: signature,
            }),
        )
        .await
        .unwrap();

        let Json(report) =
            check_signature_handler(State(state.clone()), Path(request.request_id.to_string()))
                .await
                .unwrap();
        assert_eq!(report.status, RequestStatus::Accepted);

        let missing = check_signature_handler(State(state), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let state = app_state();
        create_block_handler(State(state.clone()), Json(params(1, START + 60)))
            .await
            .unwrap();
        let Json(health) = health_handler(State(state)).await;
        assert!(health.healthy);
        assert_eq!(health.blocks, 1);
        assert_eq!(health.verifiers, 0);
    }
}
