//! Webhook wire format (spec.md §6). Parsed from raw JSON bytes rather
//! than via `#[derive(Deserialize)]` directly on the domain-facing struct,
//! since the same endpoint accepts either a single order's fields at the
//! top level or a `"orders": [...]` batch (spec.md §8 scenario 5 implies
//! more than one symbol can arrive in one request).

use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::{MarketType, OrderType, Side};
use crate::error::WebhookError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireOrderType {
    Market,
    Limit,
    StopLimit,
    StopMarket,
    CancelAllOrder,
    Cancel,
}

impl WireOrderType {
    fn parse(raw: &str) -> Result<Self, WebhookError> {
        match raw {
            "MARKET" => Ok(WireOrderType::Market),
            "LIMIT" => Ok(WireOrderType::Limit),
            "STOP_LIMIT" => Ok(WireOrderType::StopLimit),
            "STOP_MARKET" => Ok(WireOrderType::StopMarket),
            "CANCEL_ALL_ORDER" => Ok(WireOrderType::CancelAllOrder),
            "CANCEL" => Ok(WireOrderType::Cancel),
            other => Err(WebhookError::MalformedPayload(format!("unknown orderType {other}"))),
        }
    }

    /// `None` for the two cancel actions, which have no `domain::OrderType`
    /// counterpart — they never reach C5.enqueue.
    pub fn as_domain(self) -> Option<OrderType> {
        match self {
            WireOrderType::Market => Some(OrderType::Market),
            WireOrderType::Limit => Some(OrderType::Limit),
            WireOrderType::StopLimit => Some(OrderType::StopLimit),
            WireOrderType::StopMarket => Some(OrderType::StopMarket),
            WireOrderType::CancelAllOrder | WireOrderType::Cancel => None,
        }
    }

    pub fn is_cancel(self) -> bool {
        matches!(self, WireOrderType::Cancel | WireOrderType::CancelAllOrder)
    }
}

#[derive(Debug, Clone)]
pub struct OrderSignal {
    pub exchange: String,
    pub market: MarketType,
    pub currency: String,
    /// Normalized to `BASE/QUOTE` already (spec.md §6).
    pub symbol: String,
    pub order_type: WireOrderType,
    pub side: Side,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    /// Integer percent of allocated capital; negative means "close the
    /// entire existing position" (spec.md §6).
    pub qty_per: i32,
}

#[derive(Debug, Clone)]
pub struct WebhookPayload {
    pub group_name: String,
    pub token: String,
    pub orders: Vec<OrderSignal>,
}

impl WebhookPayload {
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or_else(|| WebhookError::MalformedPayload("expected a JSON object".to_string()))?;

        let group_name = required_str(obj, "group_name")?;
        let token = required_str(obj, "token")?;

        let orders = if let Some(arr) = obj.get("orders").and_then(Value::as_array) {
            arr.iter().map(parse_order_signal).collect::<Result<Vec<_>, _>>()?
        } else {
            vec![parse_order_signal(&value)?]
        };

        if orders.is_empty() {
            return Err(WebhookError::MalformedPayload("no orders in payload".to_string()));
        }

        Ok(WebhookPayload { group_name, token, orders })
    }
}

fn required_str(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String, WebhookError> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WebhookError::MalformedPayload(format!("missing {field}")))
}

fn parse_order_signal(value: &Value) -> Result<OrderSignal, WebhookError> {
    let obj = value
        .as_object()
        .ok_or_else(|| WebhookError::MalformedPayload("order entry is not an object".to_string()))?;

    let exchange = required_str(obj, "exchange")?;
    let currency = required_str(obj, "currency")?;
    let raw_symbol = required_str(obj, "symbol")?;
    let symbol = normalize_to_standard(&raw_symbol);

    let market = match required_str(obj, "market")?.as_str() {
        "SPOT" => MarketType::Spot,
        "FUTURE" => MarketType::Futures,
        other => return Err(WebhookError::MalformedPayload(format!("unknown market {other}"))),
    };

    let order_type = WireOrderType::parse(&required_str(obj, "orderType")?)?;

    let side = match required_str(obj, "side")?.as_str() {
        "buy" => Side::Buy,
        "sell" => Side::Sell,
        other => return Err(WebhookError::MalformedPayload(format!("unknown side {other}"))),
    };

    let price = parse_optional_decimal(obj, "price")?;
    let stop_price = parse_optional_decimal(obj, "stop_price")?;

    let qty_per = obj
        .get("qty_per")
        .and_then(Value::as_i64)
        .ok_or_else(|| WebhookError::MalformedPayload("missing qty_per".to_string()))? as i32;

    Ok(OrderSignal {
        exchange,
        market,
        currency,
        symbol,
        order_type,
        side,
        price,
        stop_price,
        qty_per,
    })
}

fn parse_optional_decimal(obj: &serde_json::Map<String, Value>, field: &str) -> Result<Option<Decimal>, WebhookError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(WebhookError::MalformedPayload(format!("{field} must be a number or string"))),
            };
            text.parse::<Decimal>()
                .map(Some)
                .map_err(|_| WebhookError::MalformedPayload(format!("{field} is not a valid decimal")))
        }
    }
}

/// TradingView payloads carry symbols in whatever native form the alert
/// template was written with (`BTCUSDT`, `btc_usdt`, ...); this maps the
/// common cases to `BASE/QUOTE`. Exchange-specific native formatting on
/// the way out is `ExchangeAdapter::normalize_symbol`'s job, the reverse
/// direction of this.
fn normalize_to_standard(raw: &str) -> String {
    let cleaned = raw.replace(['_', '-'], "").to_uppercase();
    if cleaned.contains('/') {
        return cleaned;
    }
    const QUOTES: [&str; 5] = ["USDT", "USDC", "BUSD", "KRW", "USD"];
    for quote in QUOTES {
        if let Some(base) = cleaned.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{base}/{quote}");
            }
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_order_shape() {
        let body = br#"{
            "group_name": "g1", "token": "t1", "exchange": "bybit",
            "market": "SPOT", "currency": "USDT", "symbol": "BTCUSDT",
            "orderType": "MARKET", "side": "buy", "qty_per": 50
        }"#;
        let payload = WebhookPayload::parse(body).unwrap();
        assert_eq!(payload.group_name, "g1");
        assert_eq!(payload.orders.len(), 1);
        assert_eq!(payload.orders[0].symbol, "BTC/USDT");
        assert_eq!(payload.orders[0].qty_per, 50);
    }

    #[test]
    fn parses_batch_orders_shape() {
        let body = br#"{
            "group_name": "g1", "token": "t1",
            "orders": [
                {"exchange": "bybit", "market": "SPOT", "currency": "USDT", "symbol": "BTC/USDT", "orderType": "LIMIT", "side": "buy", "price": "50000", "qty_per": 10},
                {"exchange": "bybit", "market": "SPOT", "currency": "USDT", "symbol": "ETH/USDT", "orderType": "LIMIT", "side": "sell", "price": "3000", "qty_per": -100}
            ]
        }"#;
        let payload = WebhookPayload::parse(body).unwrap();
        assert_eq!(payload.orders.len(), 2);
        assert_eq!(payload.orders[1].qty_per, -100);
    }

    #[test]
    fn rejects_unknown_order_type() {
        let body = br#"{
            "group_name": "g1", "token": "t1", "exchange": "bybit",
            "market": "SPOT", "currency": "USDT", "symbol": "BTCUSDT",
            "orderType": "BOGUS", "side": "buy", "qty_per": 50
        }"#;
        assert!(WebhookPayload::parse(body).is_err());
    }

    #[test]
    fn normalizes_common_quote_suffixes() {
        assert_eq!(normalize_to_standard("BTCUSDT"), "BTC/USDT");
        assert_eq!(normalize_to_standard("eth_krw"), "ETH/KRW");
        assert_eq!(normalize_to_standard("BTC/USDT"), "BTC/USDT");
    }
}
