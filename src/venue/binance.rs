// =============================================================================
// Binance USDT-M Futures venue adapter — HMAC-SHA256 signed REST + depth WS
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. All signed requests
// include X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between the engine and Binance servers.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, instrument, warn};

use super::{
    BookSnapshot, MarginMode, MarketInfo, OrderAck, OrderParams, OrderSide, OrderType,
    PositionInfo, VenueClient,
};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

/// Binance USDT-M futures venue adapter.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    ws_base_url: String,
    client: reqwest::Client,
    time_offset_ms: AtomicI64,
    markets: RwLock<HashMap<String, MarketInfo>>,
    ws_latency_threshold: std::time::Duration,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, ws_latency_threshold_seconds: u64) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceClient initialised (base_url=https://fapi.binance.com)");

        Self {
            api_key,
            secret,
            base_url: "https://fapi.binance.com".to_string(),
            ws_base_url: "wss://fstream.binance.com/ws".to_string(),
            client,
            time_offset_ms: AtomicI64::new(0),
            markets: RwLock::new(HashMap::new()),
            ws_latency_threshold: std::time::Duration::from_secs(ws_latency_threshold_seconds),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as i64;
        now + self.time_offset_ms.load(Ordering::Relaxed)
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = self.timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<serde_json::Value> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;
        Self::parse_response(resp, path).await
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<serde_json::Value> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?;
        Self::parse_response(resp, path).await
    }

    async fn signed_delete(&self, path: &str, params: &str) -> Result<serde_json::Value> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("DELETE {path} request failed"))?;
        Self::parse_response(resp, path).await
    }

    async fn parse_response(resp: reqwest::Response, path: &str) -> Result<serde_json::Value> {
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response from {path}"))?;
        if !status.is_success() {
            anyhow::bail!("Binance {path} returned {status}: {body}");
        }
        Ok(body)
    }

    fn parse_str_f64(val: &serde_json::Value) -> f64 {
        val.as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| val.as_f64())
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl VenueClient for BinanceClient {
    fn id(&self) -> &str {
        "binance"
    }

    #[instrument(skip(self), name = "binance::load_time_difference")]
    async fn load_time_difference(&self) -> Result<()> {
        let url = format!("{}/fapi/v1/time", self.base_url);
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/time failed")?
            .json()
            .await
            .context("failed to parse server time response")?;
        let server_time = body["serverTime"]
            .as_i64()
            .context("missing serverTime field")?;
        let after = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let local_mid = (before + after) / 2;
        self.time_offset_ms
            .store(server_time - local_mid, Ordering::Relaxed);
        debug!(offset_ms = server_time - local_mid, "clock offset measured");
        Ok(())
    }

    #[instrument(skip(self), name = "binance::load_markets")]
    async fn load_markets(&self) -> Result<()> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/exchangeInfo failed")?
            .json()
            .await
            .context("failed to parse exchangeInfo response")?;

        let symbols = body["symbols"]
            .as_array()
            .context("exchangeInfo missing symbols array")?;

        let mut out = HashMap::new();
        for s in symbols {
            let symbol = match s["symbol"].as_str() {
                Some(v) => v.to_string(),
                None => continue,
            };
            if s["contractType"].as_str() != Some("PERPETUAL") {
                continue;
            }
            let min_notional = s["filters"]
                .as_array()
                .into_iter()
                .flatten()
                .find(|f| f["filterType"].as_str() == Some("MIN_NOTIONAL"))
                .and_then(|f| f["notional"].as_str())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(5.0);
            // Binance futures taker fee: fixed 0.04% for the default tier.
            out.insert(
                symbol,
                MarketInfo {
                    taker_fee: 0.0004,
                    min_notional,
                },
            );
        }

        debug!(count = out.len(), "futures markets loaded");
        *self.markets.write() = out;
        Ok(())
    }

    fn markets(&self) -> Vec<String> {
        self.markets.read().keys().cloned().collect()
    }

    fn market_info(&self, instrument: &str) -> Option<MarketInfo> {
        self.markets.read().get(instrument).copied()
    }

    #[instrument(skip(self, instruments), name = "binance::fetch_tickers")]
    async fn fetch_tickers(&self, instruments: &[String]) -> Result<HashMap<String, f64>> {
        let url = format!("{}/fapi/v1/ticker/24hr", self.base_url);
        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/ticker/24hr failed")?
            .json()
            .await
            .context("failed to parse ticker response")?;

        let wanted: std::collections::HashSet<&str> =
            instruments.iter().map(|s| s.as_str()).collect();
        let mut out = HashMap::new();
        if let Some(arr) = body.as_array() {
            for entry in arr {
                if let Some(symbol) = entry["symbol"].as_str() {
                    if !wanted.contains(symbol) {
                        continue;
                    }
                    let quote_volume = Self::parse_str_f64(&entry["quoteVolume"]);
                    out.insert(symbol.to_string(), quote_volume);
                }
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, tx), name = "binance::watch_order_book")]
    async fn watch_order_book(
        &self,
        instrument: &str,
        depth: u32,
        tx: mpsc::Sender<BookSnapshot>,
    ) -> Result<()> {
        let lower = instrument.to_lowercase();
        let level = if depth <= 5 {
            5
        } else if depth <= 10 {
            10
        } else {
            20
        };
        let url = format!("{}/{lower}@depth{level}@100ms", self.ws_base_url);

        let (ws_stream, _) = connect_async(&url)
            .await
            .context("failed to connect to depth WebSocket")?;
        let (_write, mut read) = ws_stream.split();

        loop {
            let next = match tokio::time::timeout(self.ws_latency_threshold, read.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(
                        instrument,
                        threshold_secs = self.ws_latency_threshold.as_secs(),
                        "no depth message within watchdog window, forcing reconnect"
                    );
                    anyhow::bail!("depth stream for {instrument} stalled past ws_latency_threshold");
                }
            };
            match next {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                    match parse_depth_message(instrument, &text) {
                        Ok(snapshot) => {
                            if tx.send(snapshot).await.is_err() {
                                return Ok(());
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to parse depth message"),
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }

    #[instrument(skip(self), name = "binance::fetch_balance")]
    async fn fetch_balance(&self) -> Result<HashMap<String, f64>> {
        let body = self.signed_get("/fapi/v2/balance", "").await?;
        let mut out = HashMap::new();
        if let Some(arr) = body.as_array() {
            for entry in arr {
                if let Some(asset) = entry["asset"].as_str() {
                    out.insert(asset.to_string(), Self::parse_str_f64(&entry["availableBalance"]));
                }
            }
        }
        Ok(out)
    }

    #[instrument(skip(self), name = "binance::fetch_funding_rates")]
    async fn fetch_funding_rates(&self) -> Result<HashMap<String, f64>> {
        let url = format!("{}/fapi/v1/premiumIndex", self.base_url);
        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/premiumIndex failed")?
            .json()
            .await
            .context("failed to parse premiumIndex response")?;

        let mut out = HashMap::new();
        if let Some(arr) = body.as_array() {
            for entry in arr {
                if let Some(symbol) = entry["symbol"].as_str() {
                    out.insert(symbol.to_string(), Self::parse_str_f64(&entry["lastFundingRate"]));
                }
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, instruments), name = "binance::fetch_positions")]
    async fn fetch_positions(
        &self,
        instruments: &[String],
    ) -> Result<HashMap<String, PositionInfo>> {
        let body = self.signed_get("/fapi/v2/positionRisk", "").await?;
        let wanted: std::collections::HashSet<&str> =
            instruments.iter().map(|s| s.as_str()).collect();
        let mut out = HashMap::new();
        if let Some(arr) = body.as_array() {
            for entry in arr {
                if let Some(symbol) = entry["symbol"].as_str() {
                    if !wanted.contains(symbol) {
                        continue;
                    }
                    out.insert(
                        symbol.to_string(),
                        PositionInfo {
                            contracts: Self::parse_str_f64(&entry["positionAmt"]),
                            unrealized_pnl: Self::parse_str_f64(&entry["unRealizedProfit"]),
                        },
                    );
                }
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, params), name = "binance::create_order")]
    async fn create_order(
        &self,
        instrument: &str,
        order_type: OrderType,
        side: OrderSide,
        amount: f64,
        price: Option<f64>,
        params: OrderParams,
    ) -> Result<OrderAck> {
        let side_str = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let type_str = match order_type {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::TrailingStopMarket => "TRAILING_STOP_MARKET",
        };

        let mut qs = format!(
            "symbol={instrument}&side={side_str}&type={type_str}&quantity={amount}"
        );
        if let Some(p) = price {
            qs.push_str(&format!("&price={p}"));
        }
        if order_type == OrderType::Limit {
            qs.push_str("&timeInForce=GTC");
        }
        if params.reduce_only {
            qs.push_str("&reduceOnly=true");
        }
        if params.post_only {
            qs.push_str("&timeInForce=GTX");
        }
        if let Some(rate) = params.callback_rate_pct {
            qs.push_str(&format!("&callbackRate={rate:.1}"));
        }
        if let Some(coid) = &params.client_order_id {
            qs.push_str(&format!("&newClientOrderId={coid}"));
        }

        let body = self.signed_post("/fapi/v1/order", &qs).await?;
        let order_id = body["orderId"]
            .as_u64()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let status = body["status"].as_str().unwrap_or("UNKNOWN").to_string();
        debug!(instrument, side = %side, order_id, "order placed");
        Ok(OrderAck { order_id, status })
    }

    #[instrument(skip(self), name = "binance::cancel_order")]
    async fn cancel_order(&self, order_id: &str, instrument: &str) -> Result<()> {
        let qs = format!("symbol={instrument}&orderId={order_id}");
        match self.signed_delete("/fapi/v1/order", &qs).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string().to_lowercase();
                if msg.contains("unknown order") || msg.contains("order does not exist") {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    #[instrument(skip(self), name = "binance::cancel_all_orders")]
    async fn cancel_all_orders(&self, instrument: &str) -> Result<()> {
        let qs = format!("symbol={instrument}");
        self.signed_delete("/fapi/v1/allOpenOrders", &qs)
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), name = "binance::set_margin_mode")]
    async fn set_margin_mode(&self, mode: MarginMode, instrument: &str) -> Result<()> {
        let mode_str = match mode {
            MarginMode::Isolated => "ISOLATED",
            MarginMode::Cross => "CROSSED",
        };
        let qs = format!("symbol={instrument}&marginType={mode_str}");
        match self.signed_post("/fapi/v1/marginType", &qs).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("No need to change margin type") => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), name = "binance::set_leverage")]
    async fn set_leverage(&self, leverage: f64, instrument: &str) -> Result<()> {
        let qs = format!("symbol={instrument}&leverage={}", leverage as u32);
        self.signed_post("/fapi/v1/leverage", &qs).await.map(|_| ())
    }

    fn amount_to_precision(&self, _instrument: &str, amount: f64) -> f64 {
        (amount * 1000.0).round() / 1000.0
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Parse a Binance futures partial-depth WebSocket message.
///
/// ```json
/// { "b": [["37000.00","1.5"], ...], "a": [["37001.00","1.2"], ...], "T": 12345 }
/// ```
fn parse_depth_message(instrument: &str, text: &str) -> Result<BookSnapshot> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse depth JSON")?;

    let parse_levels = |key: &str| -> Vec<(f64, f64)> {
        root[key]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|lvl| {
                let price: f64 = lvl.get(0)?.as_str()?.parse().ok()?;
                let qty: f64 = lvl.get(1)?.as_str()?.parse().ok()?;
                Some((price, qty))
            })
            .collect()
    };

    let bids = parse_levels("b");
    let asks = parse_levels("a");
    let timestamp_ms = root["T"].as_i64().unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64
    });

    Ok(BookSnapshot {
        venue: "binance".to_string(),
        instrument: instrument.to_string(),
        bids,
        asks,
        timestamp_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_depth_message() {
        let text = r#"{"b":[["100.0","1.5"],["99.5","2.0"]],"a":[["100.5","1.0"]],"T":1000}"#;
        let snap = parse_depth_message("BTCUSDT", text).unwrap();
        assert_eq!(snap.bids.len(), 2);
        assert_eq!(snap.asks.len(), 1);
        assert_eq!(snap.bids[0], (100.0, 1.5));
        assert_eq!(snap.timestamp_ms, 1000);
    }

    #[test]
    fn amount_precision_rounds_to_three_decimals() {
        let c = BinanceClient::new("k", "s", 5);
        assert!((c.amount_to_precision("BTCUSDT", 0.123456) - 0.123).abs() < 1e-9);
    }
}
