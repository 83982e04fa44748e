use crate::domain::errors::ProviderError;
use crate::domain::market::observation::{Observation, TimeRange};
use crate::domain::ports::{HistoryPage, MarketDataProvider};
use crate::infrastructure::core::HttpClientFactory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

const PAGE_LIMIT: &str = "10000";

#[derive(Debug, Deserialize)]
struct HttpBar {
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<Vec<HttpBar>>,
    next_page_token: Option<String>,
}

/// Maps a bar size in minutes to the provider's timeframe token
pub fn timeframe_for(minutes: i64) -> String {
    match minutes {
        1440 => "1Day".to_string(),
        60 => "1Hour".to_string(),
        m if m > 60 && m % 60 == 0 && m < 1440 => format!("{}Hour", m / 60),
        m => format!("{}Min", m),
    }
}

/// Historical bars over HTTP (Alpaca data API layout)
pub struct HttpMarketDataProvider {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    api_secret: String,
    timeframe: String,
    timeout: Duration,
}

impl HttpMarketDataProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        bar_interval_minutes: i64,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            client: HttpClientFactory::create_client(timeout, max_retries),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            timeframe: timeframe_for(bar_interval_minutes),
            timeout,
        }
    }

    fn bars_url(
        &self,
        symbol: &str,
        range: TimeRange,
        page_token: Option<&str>,
    ) -> Result<Url, ProviderError> {
        let mut params = vec![
            ("timeframe", self.timeframe.clone()),
            ("start", range.start.to_rfc3339()),
            ("end", range.end.to_rfc3339()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("page_token", token.to_string()));
        }

        let raw = format!("{}/v2/stocks/{}/bars", self.base_url, symbol);
        Url::parse_with_params(&raw, &params).map_err(|e| ProviderError::Transport {
            reason: format!("invalid request url {}: {}", raw, e),
        })
    }

    async fn request_page(
        &self,
        symbol: &str,
        range: TimeRange,
        page_token: Option<&str>,
    ) -> Result<BarsPage, ProviderError> {
        let url = self.bars_url(symbol, range, page_token)?;
        debug!("HttpMarketDataProvider: GET {}", url);

        let response = self
            .client
            .get(url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(ProviderError::Throttled { retry_after_secs });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                symbol: symbol.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transport {
                reason: format!("HTTP {} for {}: {}", status, symbol, body),
            });
        }

        let body = response.text().await.map_err(|e| ProviderError::Transport {
            reason: e.to_string(),
        })?;
        serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
            reason: format!("bars for {}: {}", symbol, e),
        })
    }

    fn transport_error(&self, error: reqwest_middleware::Error) -> ProviderError {
        if let reqwest_middleware::Error::Reqwest(inner) = &error
            && inner.is_timeout()
        {
            return ProviderError::Timeout {
                duration_ms: self.timeout.as_millis() as u64,
            };
        }
        ProviderError::Transport {
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketDataProvider {
    async fn fetch_page(
        &self,
        symbol: &str,
        range: TimeRange,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError> {
        let page = self.request_page(symbol, range, page_token).await?;
        let observations = page
            .bars
            .unwrap_or_default()
            .into_iter()
            .map(|bar| {
                Observation::new(
                    symbol,
                    bar.timestamp,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                )
            })
            .collect();

        Ok(HistoryPage {
            observations,
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
