use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ExchangeError;
use crate::exchange::{
    candle_from_row, parse_ms, parse_num, Candle, Exchange, FundingRateEntry, Granularity,
    HttpTransport,
};

const PRODUCT_TYPE: &str = "USDT-FUTURES";
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
/// history-fund-rate rejects larger pages.
const MAX_FUNDING_PAGE: usize = 100;

pub struct Bitget {
    transport: HttpTransport,
    base: String,
}

/// Every v2 response is wrapped as `{"code": "00000", "msg": "...", "data": ...}`.
#[derive(Deserialize, Debug)]
struct BitgetResp<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct BitgetFundingRate {
    funding_rate: Value,
    funding_time: Value,
}

#[derive(Deserialize, Debug)]
struct BitgetTicker {
    symbol: String,
}

impl Bitget {
    pub fn new(base: String, transport: HttpTransport) -> Self {
        Self { transport, base }
    }

    fn as_granularity(granularity: Granularity) -> &'static str {
        match granularity {
            Granularity::M1 => "1m",
            Granularity::M3 => "3m",
            Granularity::M5 => "5m",
            Granularity::M15 => "15m",
            Granularity::M30 => "30m",
            Granularity::H1 => "1H",
            Granularity::H4 => "4H",
            Granularity::H6 => "6H",
            Granularity::H12 => "12H",
            Granularity::D1 => "1D",
            Granularity::D3 => "3D",
            Granularity::W1 => "1W",
            Granularity::Mo1 => "1M",
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base, path);
        let resp: BitgetResp<T> = self.transport.get_json(&url, query).await?;
        if resp.code != "00000" {
            return Err(ExchangeError::Upstream {
                status: 200,
                body: format!("{} {}", resp.code, resp.msg),
            });
        }
        resp.data
            .ok_or_else(|| ExchangeError::Decode(format!("{}: missing data", path)))
    }
}

#[async_trait]
impl Exchange for Bitget {
    fn name(&self) -> &'static str {
        "bitget"
    }

    fn max_lookback_ms(&self, granularity: Granularity) -> Option<i64> {
        match granularity {
            Granularity::M1 | Granularity::M3 | Granularity::M5 => Some(30 * DAY_MS),
            Granularity::M15 => Some(52 * DAY_MS),
            Granularity::M30 => Some(62 * DAY_MS),
            Granularity::H1 => Some(83 * DAY_MS),
            Granularity::H4 => Some(240 * DAY_MS),
            Granularity::H6 => Some(360 * DAY_MS),
            _ => None,
        }
    }

    async fn fetch_candle_page(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("productType", PRODUCT_TYPE.to_string()),
            ("granularity", Self::as_granularity(granularity).to_string()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_ms.to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.get("/api/v2/mix/market/candles", &query).await?;
        rows.iter().map(|row| candle_from_row(row, 6)).collect()
    }

    async fn fetch_funding_rate_page(
        &self,
        symbol: &str,
        page_size: usize,
        page_offset: usize,
    ) -> Result<Vec<FundingRateEntry>, ExchangeError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("productType", PRODUCT_TYPE.to_string()),
            ("pageSize", page_size.clamp(1, MAX_FUNDING_PAGE).to_string()),
            ("pageNo", (page_offset + 1).to_string()),
        ];
        let entries: Vec<BitgetFundingRate> =
            self.get("/api/v2/mix/market/history-fund-rate", &query).await?;
        entries
            .iter()
            .map(|e| {
                Ok(FundingRateEntry {
                    funding_time_ms: parse_ms(&e.funding_time, "fundingTime")?,
                    rate: parse_num(&e.funding_rate, "fundingRate")?,
                })
            })
            .collect()
    }

    async fn list_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        let query = [("productType", PRODUCT_TYPE.to_string())];
        let tickers: Vec<BitgetTicker> = self.get("/api/v2/mix/market/tickers", &query).await?;
        Ok(tickers.into_iter().map(|t| t.symbol).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tokens_use_uppercase_hours() {
        assert_eq!(Bitget::as_granularity(Granularity::H1), "1H");
        assert_eq!(Bitget::as_granularity(Granularity::D1), "1D");
        assert_eq!(Bitget::as_granularity(Granularity::M15), "15m");
    }

    #[test]
    fn decodes_funding_envelope() {
        let body = r#"{"code":"00000","msg":"success","data":[
            {"symbol":"BTCUSDT","fundingRate":"-0.006","fundingTime":"1700028800000"},
            {"symbol":"BTCUSDT","fundingRate":"0.0001","fundingTime":"1700000000000"}]}"#;
        let resp: BitgetResp<Vec<BitgetFundingRate>> = serde_json::from_str(body).unwrap();
        assert_eq!(resp.code, "00000");
        let data = resp.data.unwrap();
        assert_eq!(parse_ms(&data[0].funding_time, "t").unwrap(), 1_700_028_800_000);
        assert_eq!(parse_num(&data[0].funding_rate, "r").unwrap(), -0.006);
    }
}
