/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::LedgerConfig;
use crate::http_retry::send_with_retry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use statusync_protocol::{
    AccountId, BatchActivityEntry, BatchActivityRequest, BatchActivityResponse, ChainId,
    FanOfHead, FanOfSnapshot, FanRequest, FanRequestResponse,
};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("remote ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("unexpected ledger response: {0}")]
    Decode(String),
}

/// The remote calls the sync engine depends on.
#[async_trait]
pub trait RemoteLedgerClient: Send + Sync {
    /// Version marker of the fan-of list of `account_id`, `None` if the
    /// account never followed anyone.
    async fn fan_of_head(
        &self,
        chain_id: ChainId,
        account_id: AccountId,
    ) -> Result<Option<FanOfHead>, LedgerError>;

    async fn fan_of(
        &self,
        chain_id: ChainId,
        account_id: AccountId,
    ) -> Result<Option<FanOfSnapshot>, LedgerError>;

    /// Latest activity per account, aligned to the order of `accounts`.
    /// A failure covers the whole batch.
    async fn batch_activity(
        &self,
        chain_id: ChainId,
        accounts: &[AccountId],
        activity_index: u16,
    ) -> Result<Vec<BatchActivityEntry>, LedgerError>;

    async fn submit_fan_request(&self, request: &FanRequest) -> Result<(), LedgerError>;
}

/// JSON client for a ledger gateway.
#[derive(Clone)]
pub struct HttpLedgerClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    retry_attempts: u32,
}

impl HttpLedgerClient {
    pub fn new(cfg: &LedgerConfig) -> Result<Self> {
        let timeout = cfg.http_timeout_secs.unwrap_or(20).clamp(1, 300);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(concat!("statusync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg
                .token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            retry_attempts: cfg.retry_attempts.unwrap_or(3),
        })
    }

    fn fan_of_url(&self, chain_id: ChainId, account_id: AccountId) -> String {
        format!("{}/fanof/{chain_id}/{account_id}", self.base_url)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.token.as_ref() {
            Some(tok) => req.header("Authorization", format!("Bearer {tok}")),
            None => req,
        }
    }

    /// GET returning `None` on 404.
    async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, LedgerError> {
        let resp = send_with_retry(|| self.authorized(self.http.get(url)), self.retry_attempts)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{e:#}")))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(LedgerError::Unavailable(format!("GET {url}: {}", resp.status())));
        }
        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| LedgerError::Decode(format!("{e:#}")))
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, LedgerError> {
        let resp = send_with_retry(
            || self.authorized(self.http.post(url).json(body)),
            self.retry_attempts,
        )
        .await
        .map_err(|e| LedgerError::Unavailable(format!("{e:#}")))?;
        if !resp.status().is_success() {
            return Err(LedgerError::Unavailable(format!("POST {url}: {}", resp.status())));
        }
        resp.json::<T>()
            .await
            .map_err(|e| LedgerError::Decode(format!("{e:#}")))
    }
}

#[async_trait]
impl RemoteLedgerClient for HttpLedgerClient {
    async fn fan_of_head(
        &self,
        chain_id: ChainId,
        account_id: AccountId,
    ) -> Result<Option<FanOfHead>, LedgerError> {
        let url = format!("{}/head", self.fan_of_url(chain_id, account_id));
        self.get_optional(&url).await
    }

    async fn fan_of(
        &self,
        chain_id: ChainId,
        account_id: AccountId,
    ) -> Result<Option<FanOfSnapshot>, LedgerError> {
        let url = self.fan_of_url(chain_id, account_id);
        self.get_optional(&url).await
    }

    async fn batch_activity(
        &self,
        chain_id: ChainId,
        accounts: &[AccountId],
        activity_index: u16,
    ) -> Result<Vec<BatchActivityEntry>, LedgerError> {
        let url = format!("{}/activity/batch", self.base_url);
        let req = BatchActivityRequest {
            chain_id,
            activity_index,
            accounts: accounts.to_vec(),
        };
        let resp: BatchActivityResponse = self.post_json(&url, &req).await?;
        check_aligned(accounts, &resp.items)?;
        Ok(resp.items)
    }

    async fn submit_fan_request(&self, request: &FanRequest) -> Result<(), LedgerError> {
        let url = format!("{}/fan/request", self.base_url);
        let resp: FanRequestResponse = self.post_json(&url, request).await?;
        if resp.ok {
            return Ok(());
        }
        Err(LedgerError::Rejected {
            code: resp.code.unwrap_or(-1),
            message: resp.message.unwrap_or_default(),
        })
    }
}

/// Batch answers must line up one to one with the requested accounts.
pub(crate) fn check_aligned(
    accounts: &[AccountId],
    items: &[BatchActivityEntry],
) -> Result<(), LedgerError> {
    if accounts.len() != items.len() {
        return Err(LedgerError::Decode(format!(
            "batch answer has {} items for {} accounts",
            items.len(),
            accounts.len()
        )));
    }
    if let Some((want, got)) = accounts
        .iter()
        .zip(items.iter())
        .find(|(want, got)| **want != got.account_id)
    {
        return Err(LedgerError::Decode(format!(
            "batch answer out of order: expected {want}, got {}",
            got.account_id
        )));
    }
    Ok(())
}
