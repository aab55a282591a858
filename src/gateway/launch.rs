//! Outbound game-launch client.
//!
//! Asks the provider for a playable URL on behalf of a user. The provider
//! never sees the internal user id: it gets a deterministic pseudonym,
//! created once in the durable identity mapping and reused forever after
//! (regenerating it would orphan the provider's existing player record).

use crate::config::AggregatorConfig;
use crate::currency::Currency;
use crate::directory::{Game, IdentityStore};
use crate::errors::{CashdeskError, CashdeskResult};
use crate::gateway::crypto::PayloadCipher;
use crate::gateway::protocol::{
    CallbackEnvelope, LaunchRequestPayload, LaunchResponsePayload, ResponseEnvelope,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Stable pseudonymous member account for a user: salted SHA-256, truncated.
pub fn member_pseudonym(salt: &str, user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();
    format!("mbr_{}", hex::encode(&digest[..12]))
}

#[derive(Clone, Debug)]
pub struct LaunchOutcome {
    pub game_launch_url: String,
    pub member_account: String,
}

pub struct LaunchClient {
    http: reqwest::Client,
    cipher: PayloadCipher,
    identity: IdentityStore,
    config: AggregatorConfig,
}

impl LaunchClient {
    pub fn new(
        cipher: PayloadCipher,
        identity: IdentityStore,
        config: AggregatorConfig,
    ) -> CashdeskResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                CashdeskError::UpstreamProtocol(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            http,
            cipher,
            identity,
            config,
        })
    }

    /// The member account the provider knows `user_id` by, created on first
    /// use.
    pub fn member_account(&self, user_id: &str) -> CashdeskResult<String> {
        let salt = self.config.member_salt.clone();
        let user = user_id.to_string();
        self.identity
            .get_or_create(user_id, move || member_pseudonym(&salt, &user))
    }

    /// Request a launch URL for one game, reporting the user's current
    /// balance in the session currency.
    pub async fn launch(
        &self,
        user_id: &str,
        game: &Game,
        currency: Currency,
        credit_amount: Decimal,
    ) -> CashdeskResult<LaunchOutcome> {
        let member_account = self.member_account(user_id)?;

        let payload = LaunchRequestPayload {
            member_account: member_account.clone(),
            game_uid: game.game_uid.clone(),
            credit_amount,
            currency_code: currency.to_string(),
            callback_url: self.config.callback_url.clone(),
        };
        let envelope = CallbackEnvelope {
            agency_uid: self.config.agency_uid.clone(),
            timestamp: Utc::now().timestamp_millis(),
            payload: self.cipher.encrypt(&serde_json::to_vec(&payload)?),
        };

        let url = format!("{}{}", self.config.base_url, self.config.launch_path);
        tracing::debug!(%url, game_uid = %game.game_uid, %member_account, "Requesting game launch");

        let response = self
            .http
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| CashdeskError::UpstreamProtocol(format!("Launch call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CashdeskError::UpstreamProtocol(format!(
                "Launch call returned HTTP {}",
                status
            )));
        }

        let envelope: ResponseEnvelope = response.json().await.map_err(|e| {
            CashdeskError::UpstreamProtocol(format!("Unparseable launch response: {}", e))
        })?;
        if !envelope.is_ok() {
            return Err(CashdeskError::UpstreamProtocol(format!(
                "Launch rejected: code {} ({})",
                envelope.code, envelope.msg
            )));
        }

        let plaintext = self.cipher.decrypt(&envelope.payload).map_err(|e| {
            CashdeskError::UpstreamProtocol(format!("Undecryptable launch payload: {}", e))
        })?;
        let payload: LaunchResponsePayload = serde_json::from_slice(&plaintext).map_err(|e| {
            CashdeskError::UpstreamProtocol(format!("Malformed launch payload: {}", e))
        })?;
        if payload.game_launch_url.trim().is_empty() {
            return Err(CashdeskError::UpstreamProtocol(
                "Launch payload carried no URL".to_string(),
            ));
        }

        Ok(LaunchOutcome {
            game_launch_url: payload.game_launch_url,
            member_account,
        })
    }
}
