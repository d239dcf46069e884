//! # Credential Vault
//!
//! Hands out a valid upstream access token for a connection, transparently
//! refreshing it against the OAuth token endpoint when it is about to expire
//! and re-persisting the newly encrypted pair.
//!
//! Concurrent refreshes of the same connection are not serialized; the last
//! writer wins. Callers never retry a [`CredentialError::ReauthorizationRequired`].

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::UpstreamConfig;
use crate::crypto::CryptoError;
use crate::models::connection;
use crate::repositories::ConnectionRepository;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECONDS: i64 = 7200;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("stored token could not be decrypted: {0}")]
    Decryption(#[from] CryptoError),
    #[error("connection has no stored tokens")]
    MissingTokens,
    #[error("upstream rejected the refresh token (status {status}); re-authorization required")]
    ReauthorizationRequired { status: u16 },
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("credential storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Whether a token with the given expiry must be refreshed now.
///
/// A token is kept only while strictly more than `lead` remains; an unknown
/// expiry counts as expired.
pub fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>, lead: Duration) -> bool {
    match expires_at {
        Some(expires_at) => expires_at - now <= lead,
        None => true,
    }
}

#[derive(Debug, Clone)]
pub struct CredentialVault {
    repo: ConnectionRepository,
    http: reqwest::Client,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_lead: Duration,
}

impl CredentialVault {
    pub fn new(
        repo: ConnectionRepository,
        http: reqwest::Client,
        upstream: &UpstreamConfig,
        refresh_lead_seconds: i64,
    ) -> Self {
        Self {
            repo,
            http,
            token_url: upstream.token_url.clone(),
            client_id: upstream.client_id.clone(),
            client_secret: upstream.client_secret.clone(),
            refresh_lead: Duration::seconds(refresh_lead_seconds),
        }
    }

    pub fn repository(&self) -> &ConnectionRepository {
        &self.repo
    }

    /// Returns an access token valid for at least the refresh lead time.
    #[instrument(skip_all, fields(tenant_id = %connection.tenant_id, connection_id = %connection.id))]
    pub async fn get_valid_access_token(
        &self,
        connection: &connection::Model,
    ) -> Result<String, CredentialError> {
        if connection.status == connection::STATUS_REAUTH_REQUIRED {
            return Err(CredentialError::ReauthorizationRequired {
                status: StatusCode::UNAUTHORIZED.as_u16(),
            });
        }

        let (access_token, refresh_token) = match self.repo.decrypt_tokens(connection)? {
            (Some(access), Some(refresh)) => (access, refresh),
            _ => return Err(CredentialError::MissingTokens),
        };

        let expires_at = connection.expires_at.map(|dt| dt.with_timezone(&Utc));
        if !needs_refresh(expires_at, Utc::now(), self.refresh_lead) {
            return Ok(access_token);
        }

        info!(
            expires_at = ?expires_at,
            "Access token near expiry, refreshing"
        );
        self.refresh(connection, &refresh_token).await
    }

    async fn refresh(
        &self,
        connection: &connection::Model,
        refresh_token: &str,
    ) -> Result<String, CredentialError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(CredentialError::RefreshFailed(
                "upstream client credentials are not configured".to_string(),
            ));
        };

        let started = std::time::Instant::now();
        counter!("plansync_token_refresh_attempts_total").increment(1);

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                counter!("plansync_token_refresh_failure_total", "reason" => "network")
                    .increment(1);
                CredentialError::RefreshFailed(e.to_string())
            })?;

        let status = response.status();
        if status.is_client_error() {
            warn!(
                status = status.as_u16(),
                "Refresh token rejected upstream, marking connection for re-authorization"
            );
            counter!("plansync_token_refresh_failure_total", "reason" => "rejected").increment(1);
            self.repo.mark_reauth_required(&connection.id).await?;
            return Err(CredentialError::ReauthorizationRequired {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            counter!("plansync_token_refresh_failure_total", "reason" => "upstream").increment(1);
            return Err(CredentialError::RefreshFailed(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::RefreshFailed(format!("invalid token response: {e}")))?;

        let new_refresh = tokens
            .refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .unwrap_or(refresh_token);
        let expires_at = Utc::now()
            + Duration::seconds(tokens.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECONDS));

        self.repo
            .encrypt_and_update_tokens(&connection.id, &tokens.access_token, new_refresh, expires_at)
            .await?;

        histogram!("plansync_token_refresh_latency_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);
        counter!("plansync_token_refresh_success_total").increment(1);
        info!(expires_at = %expires_at, "Refreshed upstream access token");

        Ok(tokens.access_token)
    }
}
