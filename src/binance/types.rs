use serde::Deserialize;

use crate::model::candle::Candle;
use crate::model::order::{OrderFill, OrderStatus};

/// Deserialize Binance string-encoded numbers to f64.
pub fn string_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// Binance order response (newOrderRespType=FULL).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceOrderResponse {
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    #[serde(deserialize_with = "string_to_f64")]
    pub executed_qty: f64,
    #[serde(default, deserialize_with = "string_to_f64")]
    pub cummulative_quote_qty: f64,
    pub status: String,
    pub side: String,
    #[serde(default)]
    pub fills: Vec<BinanceFill>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceFill {
    #[serde(deserialize_with = "string_to_f64")]
    pub price: f64,
    #[serde(deserialize_with = "string_to_f64")]
    pub qty: f64,
    #[serde(deserialize_with = "string_to_f64")]
    pub commission: f64,
    pub commission_asset: String,
}

impl BinanceOrderResponse {
    /// Volume-weighted fill price. Falls back to the quote total when the
    /// response carries no fill breakdown.
    pub fn avg_price(&self) -> f64 {
        let filled: f64 = self.fills.iter().map(|f| f.qty).sum();
        if filled > 0.0 {
            return self.fills.iter().map(|f| f.price * f.qty).sum::<f64>() / filled;
        }
        if self.executed_qty > 0.0 {
            self.cummulative_quote_qty / self.executed_qty
        } else {
            0.0
        }
    }

    pub fn to_fill(&self) -> OrderFill {
        OrderFill {
            order_id: self.order_id,
            status: OrderStatus::from_binance_str(&self.status),
            executed_qty: self.executed_qty,
            avg_price: self.avg_price(),
        }
    }
}

/// Binance API error response.
#[derive(Debug, Deserialize)]
pub struct BinanceApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

/// Binance server time response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeResponse {
    pub server_time: u64,
}

/// Binance account info response (GET /api/v3/account).
#[derive(Debug, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<AccountBalance>,
}

#[derive(Debug, Deserialize)]
pub struct AccountBalance {
    pub asset: String,
    #[serde(deserialize_with = "string_to_f64")]
    pub free: f64,
    #[serde(deserialize_with = "string_to_f64")]
    pub locked: f64,
}

impl AccountInfo {
    /// Free balance of `asset`, zero when the account does not list it.
    pub fn free(&self, asset: &str) -> f64 {
        self.balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| b.free)
            .unwrap_or(0.0)
    }
}

/// GET /api/v3/ticker/price?symbol=...
#[derive(Debug, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(deserialize_with = "string_to_f64")]
    pub price: f64,
}

/// One row of GET /api/v3/klines. Binance encodes each kline as a positional
/// array with prices as strings.
#[derive(Debug, Deserialize)]
pub struct RawKline(
    pub u64,
    #[serde(deserialize_with = "string_to_f64")] pub f64,
    #[serde(deserialize_with = "string_to_f64")] pub f64,
    #[serde(deserialize_with = "string_to_f64")] pub f64,
    #[serde(deserialize_with = "string_to_f64")] pub f64,
    #[serde(deserialize_with = "string_to_f64")] pub f64,
    pub u64,
    pub serde::de::IgnoredAny,
    pub serde::de::IgnoredAny,
    pub serde::de::IgnoredAny,
    pub serde::de::IgnoredAny,
    pub serde::de::IgnoredAny,
);

impl From<RawKline> for Candle {
    fn from(k: RawKline) -> Self {
        Candle {
            open_time: k.0,
            open: k.1,
            high: k.2,
            low: k.3,
            close: k.4,
            volume: k.5,
            close_time: k.6,
        }
    }
}
