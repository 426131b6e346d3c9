//! Shared REST client for the upstream venue's public history endpoints.
//!
//! One instance serves every client and every command; calls are
//! stateless. History endpoints are requested ascending so replay order
//! matches event time.

use serde_json::Value;
use tdg_core::market::{normalize_candles, normalize_trades};
use tdg_core::{Market, TdgError, TdgResult};

use crate::config::UpstreamConfig;

/// Most rows one history request may return.
const FETCH_LIMIT: u32 = 5000;

/// Conf keys resolving the exchange and margin pair lists.
const MARKETS_PATH: &str = "/v2/conf/pub:list:pair:exchange,pub:list:pair:margin";

fn candles_path(tf: &str, symbol: &str) -> String {
    format!("/v2/candles/trade:{tf}:{symbol}/hist")
}

fn trades_path(symbol: &str) -> String {
    format!("/v2/trades/{symbol}/hist")
}

/// Build the market list from the conf response, a pair of pair-name
/// arrays (exchange first, margin second). Exchange ordering is kept;
/// margin-only pairs are appended.
fn markets_from_conf(value: &Value) -> TdgResult<Vec<Market>> {
    let lists = value
        .as_array()
        .ok_or_else(|| TdgError::Upstream("conf response is not an array".into()))?;
    if lists.len() < 2 {
        return Err(TdgError::Upstream(format!(
            "conf response has {} lists, expected 2",
            lists.len()
        )));
    }

    let mut markets: Vec<Market> = Vec::new();
    for symbol in pair_list(&lists[0])? {
        markets.push(Market {
            symbol,
            exchange: true,
            margin: false,
        });
    }
    for symbol in pair_list(&lists[1])? {
        match markets.iter_mut().find(|m| m.symbol == symbol) {
            Some(market) => market.margin = true,
            None => markets.push(Market {
                symbol,
                exchange: false,
                margin: true,
            }),
        }
    }
    Ok(markets)
}

fn pair_list(value: &Value) -> TdgResult<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| TdgError::Upstream("pair list is not an array".into()))?;
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect())
}

/// REST access to the upstream venue.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    transform: bool,
}

impl RestClient {
    pub fn new(config: &UpstreamConfig) -> TdgResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(agent) = config.agent.as_deref().filter(|a| !a.is_empty()) {
            builder = builder.proxy(
                reqwest::Proxy::all(agent)
                    .map_err(|e| TdgError::Config(format!("bad agent proxy url: {e}")))?,
            );
        }
        let http = builder
            .build()
            .map_err(|e| TdgError::Upstream(format!("http client build failed: {e}")))?;

        Ok(Self {
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            transform: config.transform,
        })
    }

    /// Fetch candles for a symbol and timeframe, ascending by open time.
    /// Labeled objects when transform is on, raw wire arrays otherwise.
    pub async fn candles(
        &self,
        symbol: &str,
        tf: &str,
        start: i64,
        end: i64,
    ) -> TdgResult<Vec<Value>> {
        let url = format!("{}{}", self.base_url, candles_path(tf, symbol));
        let raw = self.fetch_history(&url, start, end).await?;
        Ok(if self.transform {
            normalize_candles(&raw)
        } else {
            raw
        })
    }

    /// Fetch public trades for a symbol, ascending by execution time.
    pub async fn trades(&self, symbol: &str, start: i64, end: i64) -> TdgResult<Vec<Value>> {
        let url = format!("{}{}", self.base_url, trades_path(symbol));
        let raw = self.fetch_history(&url, start, end).await?;
        Ok(if self.transform {
            normalize_trades(&raw)
        } else {
            raw
        })
    }

    /// Fetch the tradable market list. Markets are always labeled; the
    /// conf lists carry no field order worth preserving.
    pub async fn markets(&self) -> TdgResult<Vec<Value>> {
        let url = format!("{}{}", self.base_url, MARKETS_PATH);
        let conf = self.get_json(&url, &[]).await?;
        markets_from_conf(&conf)?
            .into_iter()
            .map(|market| serde_json::to_value(market).map_err(Into::into))
            .collect()
    }

    async fn fetch_history(&self, url: &str, start: i64, end: i64) -> TdgResult<Vec<Value>> {
        let query = [
            ("start", start.to_string()),
            ("end", end.to_string()),
            ("sort", "1".to_string()),
            ("limit", FETCH_LIMIT.to_string()),
        ];
        let value = self.get_json(url, &query).await?;
        value
            .as_array()
            .cloned()
            .ok_or_else(|| TdgError::Upstream("expected array response".into()))
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> TdgResult<Value> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| TdgError::Upstream(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TdgError::Upstream(format!("{url} returned HTTP {status}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TdgError::Upstream(format!("bad response body: {e}")))
    }
}
