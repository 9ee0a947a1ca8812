//! Auction server API client

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use verification_auction::server::{
    BidUpdate, BlockView, CredentialRequest, NewVerifier, StatusReport, SubmitVerification,
};
use verification_auction::{
    BlockParams, Credential, DataBlock, Registration, RequestStatus, RoundSummary,
    VerificationRequest, Verifier, VerifierId,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct AuctionClient {
    client: Client,
    base_url: String,
}

impl AuctionClient {
    pub fn new(server_url: &str) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return resp.json().await.context("Invalid response body");
        }
        let text = resp.text().await.unwrap_or_else(|_| "Unknown error".into());
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        Err(anyhow!("Server returned {}: {}", status, message))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;
        Self::decode(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;
        Self::decode(resp).await
    }

    pub async fn blocks(&self) -> Result<Vec<BlockView>> {
        self.get("blocks").await
    }

    pub async fn add_block(&self, params: &BlockParams) -> Result<DataBlock> {
        self.post("blocks", params).await
    }

    pub async fn verifiers(&self) -> Result<Vec<Verifier>> {
        self.get("verifiers").await
    }

    pub async fn add_verifier(&self, verifier_id: VerifierId, bid_price: f64) -> Result<Verifier> {
        self.post(
            "verifiers",
            &NewVerifier {
                verifier_id,
                bid_price,
            },
        )
        .await
    }

    pub async fn update_bid(&self, verifier_id: VerifierId, bid_price: f64) -> Result<Verifier> {
        self.post(
            &format!("verifiers/{}/bid", verifier_id),
            &BidUpdate { bid_price },
        )
        .await
    }

    pub async fn register_credential(&self, credential: Credential) -> Result<Registration> {
        self.post("verifiers/credential", &CredentialRequest { credential })
            .await
    }

    pub async fn leaderboard(&self) -> Result<Vec<Verifier>> {
        self.get("leaderboard").await
    }

    pub async fn submit(&self, body: &SubmitVerification) -> Result<VerificationRequest> {
        self.post("verify", body).await
    }

    pub async fn request(&self, request_id: &str) -> Result<VerificationRequest> {
        self.get(&format!("requests/{}", request_id)).await
    }

    pub async fn report(&self, request_id: &str, status: RequestStatus) -> Result<VerificationRequest> {
        self.post(
            &format!("requests/{}/status", request_id),
            &StatusReport { status },
        )
        .await
    }

    pub async fn check(&self, request_id: &str) -> Result<StatusReport> {
        self.post(
            &format!("requests/{}/check", request_id),
            &serde_json::json!({}),
        )
        .await
    }

    pub async fn tick(&self) -> Result<RoundSummary> {
        self.post("auction/tick", &serde_json::json!({})).await
    }
}
