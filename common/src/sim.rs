// Simulated market data (for testing and development).
// Deterministic prices derived from the symbol and clock, so repeated runs
// and both engines observe identical values without a live feed.

use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use rust_decimal::Decimal;

use crate::market::{Candle, IndicatorSet, MarketDataProvider, MarketHours};

const OPEN_TIME: (u32, u32) = (14, 30); // 09:30 ET in UTC
const CLOSE_TIME: (u32, u32) = (21, 0); // 16:00 ET in UTC

/// Deterministic stand-in for the market-data collaborator
pub struct SimulatedMarketData;

impl SimulatedMarketData {
    pub fn new() -> Self {
        Self
    }

    fn base_price(symbol: &str) -> f64 {
        let seed: u32 = symbol.bytes().map(u32::from).sum();
        50.0 + f64::from(seed % 500)
    }

    fn drift(minute: u32) -> f64 {
        // Small intraday wave, deterministic per minute
        (f64::from(minute % 120) / 120.0 - 0.5) * 2.0
    }
}

impl Default for SimulatedMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for SimulatedMarketData {
    async fn stock_price(&self, symbol: &str) -> Result<Decimal> {
        let now = Utc::now();
        let minute = now.hour() * 60 + now.minute();
        let price = Self::base_price(symbol) + Self::drift(minute);
        Ok(Decimal::try_from(price)?)
    }

    async fn option_price(
        &self,
        symbol: &str,
        strike: Decimal,
        _expiration: NaiveDate,
    ) -> Result<Decimal> {
        let underlying = self.stock_price(symbol).await?;
        // Crude premium: 2% of the underlying plus intrinsic value
        let intrinsic = (underlying - strike).max(Decimal::ZERO);
        let premium = underlying * Decimal::new(2, 2) + intrinsic;
        Ok(premium.round_dp(2))
    }

    async fn candles(&self, symbol: &str, _timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let now = Utc::now();
        let base = Self::base_price(symbol);
        let mut candles = Vec::with_capacity(limit);
        for i in (0..limit).rev() {
            let timestamp = now - Duration::minutes(5 * i as i64);
            let minute = timestamp.hour() * 60 + timestamp.minute();
            let close = base + Self::drift(minute);
            candles.push(Candle {
                timestamp,
                open: Decimal::try_from(close - 0.1)?,
                high: Decimal::try_from(close + 0.2)?,
                low: Decimal::try_from(close - 0.2)?,
                close: Decimal::try_from(close)?,
                volume: Decimal::from(1_000 + (minute % 60) * 10),
            });
        }
        Ok(candles)
    }

    async fn indicators(&self, symbol: &str, _timeframe: &str) -> Result<IndicatorSet> {
        let now = Utc::now();
        let minute = now.hour() * 60 + now.minute();
        let base = Self::base_price(symbol);
        Ok(IndicatorSet {
            rsi: Some(40.0 + f64::from(minute % 20)),
            macd: Some(Self::drift(minute) * 0.3),
            macd_signal: Some(Self::drift(minute) * 0.25),
            ema_20: Some(base),
            vwap: Some(base + 0.15),
            atr: Some(1.2),
        })
    }

    async fn market_hours(&self) -> Result<MarketHours> {
        let now = Utc::now();
        let open = NaiveTime::from_hms_opt(OPEN_TIME.0, OPEN_TIME.1, 0).unwrap();
        let close = NaiveTime::from_hms_opt(CLOSE_TIME.0, CLOSE_TIME.1, 0).unwrap();

        let weekday_open = is_trading_day(now.weekday());
        let time = now.time();
        let is_open = weekday_open && time >= open && time < close;

        let next_open = if is_open {
            None
        } else {
            let mut day = now.date_naive();
            if !is_trading_day(day.weekday()) || time >= close {
                day = day.succ_opt().unwrap_or(day);
                while !is_trading_day(day.weekday()) {
                    day = day.succ_opt().unwrap_or(day);
                }
            }
            Some(Utc.from_utc_datetime(&day.and_time(open)))
        };

        let next_close = if is_open {
            Some(Utc.from_utc_datetime(&now.date_naive().and_time(close)))
        } else {
            None
        };

        Ok(MarketHours {
            is_open,
            next_open,
            next_close,
        })
    }
}

fn is_trading_day(weekday: Weekday) -> bool {
    !matches!(weekday, Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_price_is_deterministic_per_symbol() {
        assert_eq!(
            SimulatedMarketData::base_price("SPY"),
            SimulatedMarketData::base_price("SPY")
        );
        assert_ne!(
            SimulatedMarketData::base_price("SPY"),
            SimulatedMarketData::base_price("QQQ")
        );
    }

    #[tokio::test]
    async fn test_candle_count() {
        let sim = SimulatedMarketData::new();
        let candles = sim.candles("SPY", "5m", 20).await.unwrap();
        assert_eq!(candles.len(), 20);
    }
}
