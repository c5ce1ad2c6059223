//! REST client for the Alpaca API.
//!
//! Covers: multi-symbol bars, account, positions, order submission.
//! All methods are rate-limited and carry the key-pair auth headers.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use common::{
    AccountState, AssetClass, BarsRequest, BarsResponse, BotConfig, Brokerage, Error, MarketData,
    OrderRequest, OrderResponse, Position, RawBar,
};
use reqwest::{Response, StatusCode};
use tracing::{debug, info, warn};

use crate::auth::AlpacaAuth;
use crate::rate_limit::RateLimiter;

const STOCK_BARS_PATH: &str = "/v2/stocks/bars";
const CRYPTO_BARS_PATH: &str = "/v1beta3/crypto/us/bars";
const DEFAULT_MAX_BAR_PAGES: u32 = 10;

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn format_reqwest_error(err: &reqwest::Error) -> String {
    // Keep chained causes so network failures (DNS/TLS/socket) are visible.
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

fn summarize_response_body(raw: &str) -> String {
    const MAX_CHARS: usize = 800;
    let compact = raw.replace(['\n', '\r'], " ");
    if compact.chars().count() > MAX_CHARS {
        let truncated: String = compact.chars().take(MAX_CHARS).collect();
        format!("{}…", truncated)
    } else {
        compact
    }
}

fn bars_path(asset_class: AssetClass) -> &'static str {
    match asset_class {
        AssetClass::Equity => STOCK_BARS_PATH,
        AssetClass::Crypto => CRYPTO_BARS_PATH,
    }
}

/// Fold one page of a paginated bars response into the accumulated map.
fn merge_bars_page(acc: &mut HashMap<String, Vec<RawBar>>, page: BarsResponse) -> Option<String> {
    if let Some(bars) = page.bars {
        for (symbol, series) in bars {
            acc.entry(symbol).or_default().extend(series);
        }
    }
    page.next_page_token.filter(|t| !t.is_empty())
}

/// Trim every series to its `limit` most recent bars.
fn keep_most_recent(acc: &mut HashMap<String, Vec<RawBar>>, limit: u32) {
    let limit = limit as usize;
    for series in acc.values_mut() {
        if series.len() > limit {
            series.drain(..series.len() - limit);
        }
    }
}

/// Async REST client for the Alpaca trading and data APIs.
#[derive(Debug, Clone)]
pub struct AlpacaRestClient {
    client: reqwest::Client,
    auth: AlpacaAuth,
    trading_url: String,
    data_url: String,
    data_feed: String,
    max_bar_pages: u32,
    limiter: RateLimiter,
}

impl AlpacaRestClient {
    /// Create a new REST client against explicit endpoints.
    pub fn new(
        auth: AlpacaAuth,
        trading_url: &str,
        data_url: &str,
        data_feed: &str,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(15))
            .default_headers(auth.headers()?)
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            auth,
            trading_url: normalize_base_url(trading_url),
            data_url: normalize_base_url(data_url),
            data_feed: data_feed.trim().to_string(),
            max_bar_pages: DEFAULT_MAX_BAR_PAGES,
            limiter: RateLimiter::new(),
        })
    }

    /// Cap the pages followed by one bars request (at least one).
    pub fn with_max_bar_pages(mut self, pages: u32) -> Self {
        self.max_bar_pages = pages.max(1);
        self
    }

    /// Create from bot configuration.
    pub fn from_config(cfg: &BotConfig) -> Result<Self, Error> {
        let auth = AlpacaAuth::new(&cfg.api_key, &cfg.api_secret)?;
        let trading_url = cfg.resolved_trading_url();
        info!("Trading endpoint: {}", trading_url);
        Ok(Self::new(auth, &trading_url, &cfg.data_base_url, &cfg.data_feed)?
            .with_max_bar_pages(cfg.bars.max_pages))
    }

    pub fn api_key(&self) -> &str {
        &self.auth.api_key
    }

    fn trading(&self, path: &str) -> String {
        format!("{}{}", self.trading_url, path)
    }

    fn data(&self, path: &str) -> String {
        format!("{}{}", self.data_url, path)
    }

    /// Map non-success statuses onto the error taxonomy.
    async fn check_status(resp: Response) -> Result<Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited by Alpaca");
            return Err(Error::RateLimited {
                retry_after_ms: 1000,
            });
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::AlpacaApi {
            status: status.as_u16(),
            message: summarize_response_body(&body),
        })
    }

    // ── Market data ───────────────────────────────────────────────────

    /// Fetch bars for many symbols in one logical request.
    ///
    /// Follows `next_page_token` until exhausted or `max_bar_pages` pages
    /// have been read, then keeps the `limit` most recent bars per symbol,
    /// ascending by timestamp.
    pub async fn get_bars(
        &self,
        request: &BarsRequest,
    ) -> Result<HashMap<String, Vec<RawBar>>, Error> {
        let mut all_bars: HashMap<String, Vec<RawBar>> = HashMap::new();
        if request.symbols.is_empty() {
            return Ok(all_bars);
        }

        let symbols = request.symbols.join(",");
        let limit = request.limit.to_string();
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            self.limiter.wait_data().await;

            let mut req = self
                .client
                .get(self.data(bars_path(request.asset_class)))
                .query(&[
                    ("symbols", symbols.as_str()),
                    ("timeframe", request.timeframe.as_str()),
                    ("limit", limit.as_str()),
                    ("sort", "asc"),
                ]);

            if request.asset_class == AssetClass::Equity {
                req = req.query(&[("adjustment", "raw"), ("feed", self.data_feed.as_str())]);
            }
            if let Some(ref token) = page_token {
                req = req.query(&[("page_token", token.as_str())]);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| Error::Http(format_reqwest_error(&e)))?;
            let resp = Self::check_status(resp).await?;

            let page: BarsResponse = resp
                .json()
                .await
                .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

            page_token = merge_bars_page(&mut all_bars, page);
            pages += 1;

            debug!(
                "Fetched bars page {} ({} symbols so far, more={})",
                pages,
                all_bars.len(),
                page_token.is_some()
            );

            if page_token.is_none() {
                break;
            }
            if pages >= self.max_bar_pages {
                warn!(
                    "Bars request for {:?} stopped after {} pages with more data pending",
                    request.asset_class, pages
                );
                break;
            }
        }

        keep_most_recent(&mut all_bars, request.limit);

        Ok(all_bars)
    }

    // ── Account endpoints ─────────────────────────────────────────────

    /// Get account balances.
    pub async fn get_account(&self) -> Result<AccountState, Error> {
        self.limiter.wait_trading().await;

        let resp = self
            .client
            .get(self.trading("/v2/account"))
            .send()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;
        let resp = Self::check_status(resp).await?;

        resp.json()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))
    }

    /// Get all open positions.
    pub async fn list_positions(&self) -> Result<Vec<Position>, Error> {
        self.limiter.wait_trading().await;

        let resp = self
            .client
            .get(self.trading("/v2/positions"))
            .send()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;
        let resp = Self::check_status(resp).await?;

        let positions: Vec<Position> = resp
            .json()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

        debug!("Fetched {} positions", positions.len());
        Ok(positions)
    }

    /// Get the position for one symbol; `None` when the broker reports 404.
    pub async fn get_position(&self, symbol: &str) -> Result<Option<Position>, Error> {
        self.limiter.wait_trading().await;

        let path = format!("/v2/positions/{}", common::symbol_key(symbol));
        let resp = self
            .client
            .get(self.trading(&path))
            .send()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check_status(resp).await?;

        let position: Position = resp
            .json()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;
        Ok(Some(position))
    }

    // ── Write endpoints ───────────────────────────────────────────────

    /// Submit an order.
    pub async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResponse, Error> {
        self.limiter.wait_trading().await;

        debug!(
            "Submitting order: {:?} {} x{} ({:?}/{:?}) cid={}",
            order.side,
            order.symbol,
            order.qty,
            order.order_type,
            order.time_in_force,
            order.client_order_id
        );

        let resp = self
            .client
            .post(self.trading("/v2/orders"))
            .json(order)
            .send()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;
        let resp = Self::check_status(resp).await?;

        let raw_body = resp.text().await.unwrap_or_default();
        let order_resp: OrderResponse = serde_json::from_str(&raw_body).map_err(|e| {
            Error::Http(format!(
                "Error decoding submit_order response: {}; body={}",
                e,
                summarize_response_body(&raw_body)
            ))
        })?;

        debug!(
            "Order accepted: id={} status={}",
            order_resp.id, order_resp.status
        );

        Ok(order_resp)
    }
}

#[async_trait]
impl MarketData for AlpacaRestClient {
    async fn fetch_bars(&self, request: &BarsRequest) -> Result<HashMap<String, Vec<RawBar>>, Error> {
        self.get_bars(request).await
    }
}

#[async_trait]
impl Brokerage for AlpacaRestClient {
    async fn get_account(&self) -> Result<AccountState, Error> {
        AlpacaRestClient::get_account(self).await
    }

    async fn list_positions(&self) -> Result<Vec<Position>, Error> {
        AlpacaRestClient::list_positions(self).await
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, Error> {
        AlpacaRestClient::get_position(self, symbol).await
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResponse, Error> {
        AlpacaRestClient::submit_order(self, order).await
    }
}
