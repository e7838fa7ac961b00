use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use crate::error::AppError;
use crate::exchange::Exchange;
use crate::model::candle::Candle;
use crate::model::order::{format_quantity, OrderFill, OrderSide};
use crate::time_sync::{RetryOn, ServerTimeSource, TimeSync};

use super::types::{
    AccountInfo, BinanceApiErrorResponse, BinanceOrderResponse, RawKline, ServerTimeResponse,
    TickerPrice,
};

/// Turn a non-2xx Binance response into `AppError::BinanceApi` when the body
/// carries the usual `{code, msg}` shape.
async fn read_json<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if let Ok(err) = serde_json::from_str::<BinanceApiErrorResponse>(&body) {
            return Err(AppError::BinanceApi {
                code: err.code,
                msg: err.msg,
            }
            .into());
        }
        return Err(anyhow!("{} failed with {}: {}", what, status, body));
    }
    resp.json::<T>()
        .await
        .with_context(|| format!("{} returned an unreadable body", what))
}

/// Unsigned `/api/v3/time` reader feeding a [`TimeSync`].
pub struct BinanceTimeSource {
    http: reqwest::Client,
    base_url: String,
}

impl BinanceTimeSource {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ServerTimeSource for BinanceTimeSource {
    async fn fetch_server_time(&self) -> Result<u64> {
        let url = format!("{}/api/v3/time", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("server_time failed")?;
        let body: ServerTimeResponse = read_json(resp, "server_time").await?;
        Ok(body.server_time)
    }
}

pub struct BinanceRestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    recv_window: u64,
    time_sync: Arc<TimeSync>,
    // Simple rate limiter: request count in current minute window
    request_count: AtomicU64,
    window_start: std::sync::Mutex<Instant>,
}

impl BinanceRestClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: &str,
        secret_key: &str,
        recv_window: u64,
        time_sync: Arc<TimeSync>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            recv_window,
            time_sync,
            request_count: AtomicU64::new(0),
            window_start: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn sign(&self, query: &str, timestamp: u64) -> Result<String> {
        let full_query = if query.is_empty() {
            format!("recvWindow={}&timestamp={}", self.recv_window, timestamp)
        } else {
            format!(
                "{}&recvWindow={}&timestamp={}",
                query, self.recv_window, timestamp
            )
        };
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| anyhow!("HMAC key error: {}", e))?;
        mac.update(full_query.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{}&signature={}", full_query, signature))
    }

    fn check_rate_limit(&self) {
        let mut start = self
            .window_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if start.elapsed().as_secs() >= 60 {
            *start = Instant::now();
            self.request_count.store(0, Ordering::Relaxed);
        }
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count > 960 {
            tracing::warn!(count, "Approaching rate limit (80% of 1200/min)");
        }
    }

    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.check_rate_limit();
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval,
            limit.clamp(1, 1000)
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("klines HTTP failed")?;
        let rows: Vec<RawKline> = read_json(resp, "klines").await?;
        let mut candles: Vec<Candle> = rows.into_iter().map(Candle::from).collect();
        // The last row is the candle still forming.
        let now = self.time_sync.server_now_ms();
        candles.retain(|c| c.close_time < now);
        Ok(candles)
    }

    pub async fn get_ticker_price(&self, symbol: &str) -> Result<f64> {
        self.check_rate_limit();
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("ticker_price HTTP failed")?;
        let ticker: TickerPrice = read_json(resp, "ticker_price").await?;
        Ok(ticker.price)
    }

    pub async fn get_account(&self) -> Result<AccountInfo> {
        self.time_sync
            .with_timestamp_retry(RetryOn::AnyTransient, |timestamp| async move {
                self.check_rate_limit();
                let signed = self.sign("", timestamp)?;
                let url = format!("{}/api/v3/account?{}", self.base_url, signed);
                let resp = self
                    .http
                    .get(&url)
                    .header("X-MBX-APIKEY", &self.api_key)
                    .send()
                    .await
                    .context("account HTTP failed")?;
                read_json::<AccountInfo>(resp, "account").await
            })
            .await
    }

    /// Only timestamp rejections are retried: after a transport failure the
    /// order may already be live on the exchange.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<BinanceOrderResponse> {
        let query = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newClientOrderId={}&newOrderRespType=FULL",
            symbol,
            side.as_binance_str(),
            format_quantity(quantity),
            client_order_id,
        );

        tracing::info!(
            symbol,
            side = %side,
            quantity,
            client_order_id,
            "Placing market order"
        );

        let order: BinanceOrderResponse = self
            .time_sync
            .with_timestamp_retry(RetryOn::TimestampRejection, |timestamp| {
                let query = query.as_str();
                async move {
                    self.check_rate_limit();
                    let signed = self.sign(query, timestamp)?;
                    let url = format!("{}/api/v3/order?{}", self.base_url, signed);
                    let resp = self
                        .http
                        .post(&url)
                        .header("X-MBX-APIKEY", &self.api_key)
                        .send()
                        .await
                        .context("place_market_order HTTP failed")?;
                    read_json::<BinanceOrderResponse>(resp, "place_market_order").await
                }
            })
            .await?;

        tracing::info!(
            order_id = order.order_id,
            status = %order.status,
            client_order_id = %order.client_order_id,
            "Order response received"
        );
        Ok(order)
    }
}

#[async_trait]
impl Exchange for BinanceRestClient {
    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.get_klines(symbol, interval, limit).await
    }

    async fn latest_price(&self, symbol: &str) -> Result<f64> {
        self.get_ticker_price(symbol).await
    }

    async fn free_balance(&self, asset: &str) -> Result<f64> {
        Ok(self.get_account().await?.free(asset))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<OrderFill> {
        let resp = BinanceRestClient::place_market_order(self, symbol, side, quantity, client_order_id)
            .await?;
        Ok(resp.to_fill())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeSyncConfig;
    use crate::time_sync::ManualClock;

    struct FixedTime(u64);

    #[async_trait]
    impl ServerTimeSource for FixedTime {
        async fn fetch_server_time(&self) -> Result<u64> {
            Ok(self.0)
        }
    }

    fn client() -> BinanceRestClient {
        let sync = TimeSync::new(
            Arc::new(FixedTime(1_700_000_000_000)),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            TimeSyncConfig::default(),
        );
        BinanceRestClient::new(
            reqwest::Client::new(),
            "https://testnet.binance.vision/",
            "test_key",
            "test_secret",
            30_000,
            Arc::new(sync),
        )
    }

    #[test]
    fn hmac_signing_produces_hex_signature() {
        let client = client();
        let signed = client.sign("symbol=BTCUSDT&side=BUY", 1_700_000_000_000).unwrap();
        assert!(signed.starts_with(
            "symbol=BTCUSDT&side=BUY&recvWindow=30000&timestamp=1700000000000&signature="
        ));

        // Signature should be 64-char hex (SHA256)
        let sig = signed.split("&signature=").nth(1).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_query_signs_without_leading_ampersand() {
        let signed = client().sign("", 42).unwrap();
        assert!(signed.starts_with("recvWindow=30000&timestamp=42&signature="));
    }

    #[test]
    fn hmac_known_vector() {
        // Binance docs example: queryString with known secret should produce known signature
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(query.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }
}
