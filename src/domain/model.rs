use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 銷售訂單中的一個品項
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_id: String,
    pub name: Option<String>,
    pub units: Option<f64>,
    pub price: Option<f64>,
}

/// 從訂單 API 取得的銷售訂單，取得後不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub document_number: Option<String>,
    pub customer_name: Option<String>,
    pub total: Option<f64>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// 解析 API 回傳的單筆訂單；沒有 id 的物件回傳 None
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let id = text(obj.get("id"))?;

        let created_at = obj
            .get("date")
            .or_else(|| obj.get("createdAt"))
            .or_else(|| obj.get("created_at"))
            .and_then(timestamp);

        let customer_name = text(obj.get("contactName")).or_else(|| match obj.get("contact") {
            Some(Value::Object(contact)) => text(contact.get("name")),
            _ => None,
        });

        let lines = obj
            .get("products")
            .or_else(|| obj.get("items"))
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(OrderLine::from_value).collect())
            .unwrap_or_default();

        Some(Self {
            id,
            created_at,
            document_number: text(obj.get("docNumber")),
            customer_name,
            total: number(obj.get("total")),
            lines,
        })
    }
}

impl OrderLine {
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        // sku 優先，其次 code；兩者都沒有的品項仍保留，但永遠不會匹配
        let item_id = text(obj.get("sku"))
            .or_else(|| text(obj.get("code")))
            .unwrap_or_default();

        Some(Self {
            item_id,
            name: text(obj.get("name")),
            units: number(obj.get("units")).or_else(|| number(obj.get("quantity"))),
            price: number(obj.get("price")),
        })
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 支援 Unix 秒數 (數字或字串) 與 RFC 3339
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(secs) => Utc.timestamp_opt(secs, 0).single(),
                Err(_) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc)),
            }
        }
        _ => None,
    }
}

/// 半開區間 [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(MonitorError::ConfigValidationError {
                field: "time_window".to_string(),
                message: format!("window start {} must be before end {}", start, end),
            });
        }
        Ok(Self { start, end })
    }

    pub fn ending_at(now: DateTime<Utc>, lookback: Duration) -> Result<Self> {
        let start = now
            .checked_sub_signed(lookback)
            .ok_or_else(|| MonitorError::ConfigValidationError {
                field: "time_window".to_string(),
                message: format!("lookback of {} hours is out of range", lookback.num_hours()),
            })?;
        Self::new(start, now)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// 交給通知端的資料：只包含格式化郵件所需的欄位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderNotification {
    pub order_id: String,
    pub document_number: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub customer_name: Option<String>,
    pub total: Option<f64>,
    pub matched_lines: Vec<OrderLine>,
}

impl OrderNotification {
    pub fn new(order: &Order, matched_lines: Vec<OrderLine>) -> Self {
        Self {
            order_id: order.id.clone(),
            document_number: order.document_number.clone(),
            created_at: order.created_at,
            customer_name: order.customer_name.clone(),
            total: order.total,
            matched_lines,
        }
    }

    /// 郵件標題與日誌使用的顯示名稱
    pub fn display_reference(&self) -> &str {
        self.document_number.as_deref().unwrap_or(&self.order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_from_holded_document() {
        let value = json!({
            "id": "65f1c0ffee",
            "docNumber": "SO-0042",
            "date": 1718000000,
            "contact": {"name": "Velo Shop"},
            "total": "1299.90",
            "products": [
                {"name": "Cairon C 2.0", "sku": "00123", "units": 1, "price": 1299.9},
                {"name": "Service", "units": 1}
            ]
        });

        let order = Order::from_value(&value).unwrap();
        assert_eq!(order.id, "65f1c0ffee");
        assert_eq!(order.document_number.as_deref(), Some("SO-0042"));
        assert_eq!(order.customer_name.as_deref(), Some("Velo Shop"));
        assert_eq!(order.total, Some(1299.90));
        assert_eq!(order.created_at.unwrap().timestamp(), 1718000000);
        assert_eq!(order.lines.len(), 2);
        assert_eq!(order.lines[0].item_id, "00123");
        assert_eq!(order.lines[1].item_id, "");
    }

    #[test]
    fn test_order_prefers_contact_name_and_items_fallback() {
        let value = json!({
            "id": 7,
            "contactName": "Direct Name",
            "contact": "c-1",
            "createdAt": "2024-06-10T08:00:00Z",
            "items": [{"code": 4711, "quantity": "2"}]
        });

        let order = Order::from_value(&value).unwrap();
        assert_eq!(order.id, "7");
        assert_eq!(order.customer_name.as_deref(), Some("Direct Name"));
        assert_eq!(order.lines[0].item_id, "4711");
        assert_eq!(order.lines[0].units, Some(2.0));
        assert!(order.created_at.is_some());
    }

    #[test]
    fn test_order_without_id_is_rejected() {
        assert!(Order::from_value(&json!({"docNumber": "SO-1"})).is_none());
        assert!(Order::from_value(&json!("not an object")).is_none());
    }

    #[test]
    fn test_time_window_is_half_open() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        let window = TimeWindow::ending_at(now, Duration::hours(24)).unwrap();

        assert_eq!(window.duration(), Duration::hours(24));
        assert!(window.contains(now - Duration::hours(24)));
        assert!(window.contains(now - Duration::seconds(1)));
        assert!(!window.contains(now));
        assert!(TimeWindow::ending_at(now, Duration::zero()).is_err());
    }

    #[test]
    fn test_oversized_lookback_is_an_error() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        assert!(matches!(
            TimeWindow::ending_at(now, Duration::days(365 * 1_000_000)),
            Err(MonitorError::ConfigValidationError { .. })
        ));
    }
}
