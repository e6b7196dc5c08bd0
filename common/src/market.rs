use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Technical indicator values at snapshot time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub ema_20: Option<f64>,
    pub vwap: Option<f64>,
    pub atr: Option<f64>,
}

/// Market session state as reported by the market-data collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHours {
    pub is_open: bool,
    pub next_open: Option<DateTime<Utc>>,
    pub next_close: Option<DateTime<Utc>>,
}

/// Point-in-time market state captured for one signal. Serialized as the
/// JSONB `contents` of a `MarketContext`; the integrity hash is computed
/// over this serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timeframe: String,
    pub captured_at: DateTime<Utc>,
    pub current_price: Decimal,
    pub market_open: bool,
    pub candles: Vec<Candle>,
    pub indicators: IndicatorSet,
}

/// Immutable market-context row: exactly one per enriched signal.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketContext {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub contents: serde_json::Value,
    /// SHA-256 hex over the serialized contents; reproducible for audit
    pub context_hash: String,
}

/// Market-data collaborator. Any call may fail or be rate limited; callers
/// treat failure as retry-later, never as fatal.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn stock_price(&self, symbol: &str) -> Result<Decimal>;

    async fn option_price(
        &self,
        symbol: &str,
        strike: Decimal,
        expiration: NaiveDate,
    ) -> Result<Decimal>;

    async fn candles(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>>;

    async fn indicators(&self, symbol: &str, timeframe: &str) -> Result<IndicatorSet>;

    async fn market_hours(&self) -> Result<MarketHours>;
}
