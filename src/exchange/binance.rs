use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ExchangeError;
use crate::exchange::{
    candle_from_row, parse_num, Candle, Exchange, FundingRateEntry, Granularity, HttpTransport,
};

pub struct Binance {
    transport: HttpTransport,
    base: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct BinanceFundingRate {
    funding_rate: Value,
    funding_time: i64,
}

#[derive(Deserialize, Debug)]
struct BinanceExchangeInfo {
    symbols: Vec<BinanceSymbol>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct BinanceSymbol {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    quote_asset: String,
    #[serde(default)]
    status: String,
}

impl BinanceSymbol {
    fn is_usdt_perpetual(&self) -> bool {
        self.contract_type == "PERPETUAL" && self.quote_asset == "USDT" && self.status == "TRADING"
    }
}

impl Binance {
    pub fn new(base: String, transport: HttpTransport) -> Self {
        Self { transport, base }
    }

    fn as_kline_interval(granularity: Granularity) -> &'static str {
        // Binance's tokens are the canonical ones.
        granularity.as_str()
    }

    async fn funding_chunk(
        &self,
        symbol: &str,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<FundingRateEntry>, ExchangeError> {
        let url = format!("{}/fapi/v1/fundingRate", self.base);
        let mut query = vec![("symbol", symbol.to_string()), ("limit", limit.to_string())];
        if let Some(end) = end_time {
            query.push(("endTime", end.to_string()));
        }
        let raw: Vec<BinanceFundingRate> = self.transport.get_json(&url, &query).await?;
        let mut entries = raw
            .iter()
            .map(|r| {
                Ok(FundingRateEntry {
                    funding_time_ms: r.funding_time,
                    rate: parse_num(&r.funding_rate, "fundingRate")?,
                })
            })
            .collect::<Result<Vec<_>, ExchangeError>>()?;
        // Delivered oldest first.
        entries.reverse();
        Ok(entries)
    }
}

#[async_trait]
impl Exchange for Binance {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn fetch_candle_page(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let url = format!("{}/fapi/v1/klines", self.base);
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", Self::as_kline_interval(granularity).to_string()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_ms.to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.transport.get_json(&url, &query).await?;
        // [openTime, o, h, l, c, volume, closeTime, quoteAssetVolume, ...]
        rows.iter().map(|row| candle_from_row(row, 7)).collect()
    }

    /// Binance pages funding history by time cursor, so page `n` walks the
    /// `endTime` cursor back through the `n` newer pages first.
    async fn fetch_funding_rate_page(
        &self,
        symbol: &str,
        page_size: usize,
        page_offset: usize,
    ) -> Result<Vec<FundingRateEntry>, ExchangeError> {
        let page_size = page_size.clamp(1, 1000);
        let mut end_time = None;
        for page in 0..=page_offset {
            let entries = self.funding_chunk(symbol, page_size, end_time).await?;
            if page == page_offset {
                return Ok(entries);
            }
            match entries.last() {
                Some(oldest) if entries.len() == page_size => {
                    end_time = Some(oldest.funding_time_ms - 1);
                }
                _ => return Ok(Vec::new()),
            }
        }
        Ok(Vec::new())
    }

    async fn list_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base);
        let info: BinanceExchangeInfo = self.transport.get_json(&url, &[]).await?;
        Ok(info
            .symbols
            .into_iter()
            .filter(BinanceSymbol::is_usdt_perpetual)
            .map(|s| s.symbol)
            .collect())
    }
}
