//! HTTP rate provider for exchangerate-api style endpoints.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::config::HttpProviderConfig;
use crate::error::{FxError, FxResult};
use crate::provider::RateProvider;

#[derive(Debug, Deserialize)]
struct PairResponse {
    result: String,
    #[serde(default)]
    conversion_rate: Option<Decimal>,
    #[serde(rename = "error-type", default)]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    result: String,
    #[serde(default)]
    conversion_rates: HashMap<String, Decimal>,
    #[serde(rename = "error-type", default)]
    error_type: Option<String>,
}

/// Rate provider backed by the exchangerate-api v6 REST API.
pub struct ExchangeRateApiProvider {
    client: Client,
    config: HttpProviderConfig,
}

impl ExchangeRateApiProvider {
    /// Create a new provider.
    pub fn new(config: HttpProviderConfig) -> FxResult<Self> {
        config.validate().map_err(FxError::Configuration)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FxError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn pair_url(&self, from: &str, to: &str) -> String {
        format!(
            "{}/{}/pair/{}/{}",
            self.config.base_url,
            self.config.api_key,
            from.to_uppercase(),
            to.to_uppercase()
        )
    }

    fn latest_url(&self, base: &str) -> String {
        format!(
            "{}/{}/latest/{}",
            self.config.base_url,
            self.config.api_key,
            base.to_uppercase()
        )
    }

    async fn fetch<T: for<'de> Deserialize<'de>>(&self, url: String) -> FxResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FxError::ProviderError(e.without_url().to_string()))?
            .error_for_status()
            .map_err(|e| FxError::ProviderError(e.without_url().to_string()))?;

        response
            .json::<T>()
            .await
            .map_err(|e| FxError::ProviderError(e.without_url().to_string()))
    }
}

fn upstream_error(error_type: Option<String>) -> FxError {
    FxError::ProviderError(error_type.unwrap_or_else(|| "unknown-error".to_string()))
}

#[async_trait]
impl RateProvider for ExchangeRateApiProvider {
    fn name(&self) -> &str {
        "exchangerate-api"
    }

    async fn get_rate(&self, from: &str, to: &str) -> FxResult<Decimal> {
        let body: PairResponse = self.fetch(self.pair_url(from, to)).await?;
        if body.result != "success" {
            return Err(upstream_error(body.error_type));
        }

        let rate = body
            .conversion_rate
            .ok_or_else(|| FxError::RateNotAvailable(format!("{}/{}", from, to)))?;

        debug!(from = %from, to = %to, rate = %rate, "Fetched pair rate");
        Ok(rate)
    }

    async fn get_rates(&self, base: &str) -> FxResult<HashMap<String, Decimal>> {
        let body: LatestResponse = self.fetch(self.latest_url(base)).await?;
        if body.result != "success" {
            return Err(upstream_error(body.error_type));
        }

        debug!(base = %base, count = body.conversion_rates.len(), "Fetched rate table");
        Ok(body.conversion_rates)
    }
}
