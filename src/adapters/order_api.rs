use crate::domain::model::{Order, TimeWindow};
use crate::domain::ports::OrderSource;
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderName, ACCEPT, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

const MAX_BODY_EXCERPT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 含第一次請求在內的總嘗試次數
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// 第 n 次失敗後的等待時間：base * 2^(n-1)，上限 max_delay
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Clone)]
pub struct OrderApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub auth_header: String,
    pub doc_type: String,
    /// 已知每頁筆數時，較短的頁面即視為最後一頁
    pub page_size: Option<usize>,
    pub max_pages: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for OrderApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("auth_header", &self.auth_header)
            .field("doc_type", &self.doc_type)
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

enum PageFailure {
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    Fatal(MonitorError),
}

struct Page {
    orders: Vec<Value>,
    has_more: Option<bool>,
}

/// 銷售訂單 API 用戶端 (`GET {base}/documents/{type}?starttmp&endtmp&page`)
pub struct HttpOrderSource {
    client: Client,
    config: OrderApiConfig,
    auth_header: HeaderName,
}

impl HttpOrderSource {
    pub fn new(config: OrderApiConfig) -> Result<Self> {
        let auth_header = HeaderName::from_bytes(config.auth_header.as_bytes()).map_err(|e| {
            MonitorError::InvalidConfigValueError {
                field: "source.auth_header".to_string(),
                value: config.auth_header.clone(),
                reason: e.to_string(),
            }
        })?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            auth_header,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/documents/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.doc_type
        )
    }

    /// 惰性的分頁游標；每次呼叫都從第一頁重新開始
    pub fn pages(&self, window: &TimeWindow) -> OrderPages<'_> {
        OrderPages {
            source: self,
            window: *window,
            next_page: 1,
            finished: false,
            previous_ids: None,
        }
    }

    /// 只取第一頁，回傳筆數
    pub async fn test_connection(&self, window: &TimeWindow) -> Result<usize> {
        let body = self.request_page(window, 1).await?;
        Ok(parse_page(body)?.orders.len())
    }

    async fn request_page(&self, window: &TimeWindow, page: u32) -> Result<Value> {
        let policy = self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt_page(window, page).await {
                Ok(body) => return Ok(body),
                Err(PageFailure::Fatal(e)) => return Err(e),
                Err(PageFailure::Transient {
                    message,
                    retry_after,
                }) => {
                    if attempt >= policy.max_attempts {
                        tracing::error!(
                            "📡 Page {} failed after {} attempts: {}",
                            page,
                            attempt,
                            message
                        );
                        return Err(MonitorError::SourceUnavailableError {
                            attempts: attempt,
                            message,
                        });
                    }

                    let delay = policy
                        .delay_for(attempt)
                        .max(retry_after.unwrap_or_default())
                        .min(policy.max_delay);
                    tracing::warn!(
                        "⚠️ Page {} attempt {}/{} failed ({}), retrying in {:?}",
                        page,
                        attempt,
                        policy.max_attempts,
                        message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt_page(
        &self,
        window: &TimeWindow,
        page: u32,
    ) -> std::result::Result<Value, PageFailure> {
        tracing::debug!("📡 Requesting page {} from {}", page, self.endpoint());

        let response = self
            .client
            .get(self.endpoint())
            .header(self.auth_header.clone(), self.config.api_key.as_str())
            .header(ACCEPT, "application/json")
            .query(&[
                ("starttmp", window.start.timestamp().to_string()),
                ("endtmp", window.end.timestamp().to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    PageFailure::Fatal(MonitorError::ApiError(e))
                } else {
                    PageFailure::Transient {
                        message: format!("network error: {}", e),
                        retry_after: None,
                    }
                }
            })?;

        let status = response.status();
        tracing::debug!("📡 Page {} response status: {}", page, status);

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(PageFailure::Transient {
                message: "rate limited (429)".to_string(),
                retry_after,
            });
        }

        if status.is_server_error() {
            return Err(PageFailure::Transient {
                message: format!("server error {}", status),
                retry_after: None,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PageFailure::Fatal(MonitorError::SourceRequestError {
                status: Some(status.as_u16()),
                message: format!("{} on page {}: {}", status, page, excerpt(&body)),
            }));
        }

        let bytes = response.bytes().await.map_err(|e| PageFailure::Transient {
            message: format!("failed reading body: {}", e),
            retry_after: None,
        })?;

        serde_json::from_slice(&bytes).map_err(|e| {
            PageFailure::Fatal(MonitorError::SourceRequestError {
                status: Some(status.as_u16()),
                message: format!("malformed JSON on page {}: {}", page, e),
            })
        })
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(MAX_BODY_EXCERPT).collect()
}

/// 支援裸陣列，或以 `data` / `documents` 包裝的物件 (`has_more` / `next_page` 控制分頁)
fn parse_page(body: Value) -> Result<Page> {
    match body {
        Value::Array(orders) => Ok(Page {
            orders,
            has_more: None,
        }),
        Value::Object(mut obj) => {
            let orders = match obj.remove("data").or_else(|| obj.remove("documents")) {
                Some(Value::Array(orders)) => orders,
                _ => {
                    return Err(MonitorError::SourceRequestError {
                        status: None,
                        message: "response object has no 'data' array".to_string(),
                    })
                }
            };
            // 包裝格式沒有 has_more 時，以 next_page 是否存在判斷
            let has_more = obj.get("has_more").and_then(Value::as_bool).unwrap_or_else(|| {
                obj.get("next_page").is_some_and(|next| !next.is_null())
            });
            Ok(Page {
                orders,
                has_more: Some(has_more),
            })
        }
        other => Err(MonitorError::SourceRequestError {
            status: None,
            message: format!("unexpected response type: {}", other),
        }),
    }
}

pub struct OrderPages<'a> {
    source: &'a HttpOrderSource,
    window: TimeWindow,
    next_page: u32,
    finished: bool,
    previous_ids: Option<Vec<String>>,
}

impl OrderPages<'_> {
    /// 下一頁訂單；沒有更多頁時回傳 None。發生錯誤後游標即結束
    pub async fn next_page(&mut self) -> Result<Option<Vec<Order>>> {
        if self.finished {
            return Ok(None);
        }

        if self.next_page > self.source.config.max_pages {
            self.finished = true;
            return Err(MonitorError::SourceRequestError {
                status: None,
                message: format!(
                    "source still reports more orders after {} pages",
                    self.source.config.max_pages
                ),
            });
        }

        let page_number = self.next_page;
        let page = match self.fetch(page_number).await {
            Ok(page) => page,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        if page.orders.is_empty() {
            self.finished = true;
            return Ok(None);
        }

        let raw_count = page.orders.len();
        let orders: Vec<Order> = page
            .orders
            .iter()
            .filter_map(|value| {
                let order = Order::from_value(value);
                if order.is_none() {
                    tracing::warn!("⚠️ Skipping order without id on page {}", page_number);
                }
                order
            })
            .collect();

        let ids: Vec<String> = orders.iter().map(|order| order.id.clone()).collect();
        if self.previous_ids.as_ref() == Some(&ids) {
            tracing::warn!(
                "⚠️ Page {} repeats the previous page, source ignores pagination",
                page_number
            );
            self.finished = true;
            return Ok(None);
        }

        self.finished = match page.has_more {
            Some(has_more) => !has_more,
            None => self
                .source
                .config
                .page_size
                .is_some_and(|size| raw_count < size),
        };
        self.next_page += 1;
        self.previous_ids = Some(ids);

        Ok(Some(orders))
    }

    async fn fetch(&self, page_number: u32) -> Result<Page> {
        let body = self.source.request_page(&self.window, page_number).await?;
        parse_page(body)
    }
}

#[async_trait]
impl OrderSource for HttpOrderSource {
    async fn fetch_orders(&self, window: &TimeWindow) -> Result<Vec<Order>> {
        let mut pages = self.pages(window);
        let mut orders = Vec::new();
        let mut page_count = 0;

        while let Some(page) = pages.next_page().await? {
            page_count += 1;
            orders.extend(page);
        }

        tracing::info!(
            "📡 Fetched {} orders across {} pages ({} → {})",
            orders.len(),
            page_count,
            window.start,
            window.end
        );
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use httpmock::prelude::*;
    use serde_json::json;

    const PATH: &str = "/documents/salesorder";

    fn window() -> TimeWindow {
        let end = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        TimeWindow::ending_at(end, chrono::Duration::hours(24)).unwrap()
    }

    fn source(base_url: String) -> HttpOrderSource {
        HttpOrderSource::new(OrderApiConfig {
            base_url,
            api_key: "secret".to_string(),
            auth_header: "key".to_string(),
            doc_type: "salesorder".to_string(),
            page_size: None,
            max_pages: 10,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        })
        .unwrap()
    }

    fn order(id: &str) -> Value {
        json!({"id": id, "date": 1718000000, "products": [{"sku": "00123"}]})
    }

    #[test]
    fn test_retry_delay_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_paginates_until_empty_page() {
        let server = MockServer::start();
        let w = window();

        let page1 = server.mock(|when, then| {
            when.method(GET)
                .path(PATH)
                .header("key", "secret")
                .query_param("starttmp", w.start.timestamp().to_string())
                .query_param("endtmp", w.end.timestamp().to_string())
                .query_param("page", "1");
            then.status(200).json_body(json!([order("a"), order("b")]));
        });
        let page2 = server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "2");
            then.status(200).json_body(json!([order("c")]));
        });
        let page3 = server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "3");
            then.status(200).json_body(json!([]));
        });

        let orders = source(server.base_url()).fetch_orders(&w).await.unwrap();

        page1.assert();
        page2.assert();
        page3.assert();
        let ids: Vec<_> = orders.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_envelope_has_more_false_stops() {
        let server = MockServer::start();
        let page1 = server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "1");
            then.status(200)
                .json_body(json!({"data": [order("a")], "has_more": false}));
        });
        let page2 = server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "2");
            then.status(200).json_body(json!({"data": [order("b")]}));
        });

        let orders = source(server.base_url()).fetch_orders(&window()).await.unwrap();

        page1.assert();
        page2.assert_hits(0);
        assert_eq!(orders.len(), 1);
    }

    #[tokio::test]
    async fn test_envelope_follows_next_page() {
        let server = MockServer::start();
        let page1 = server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "1");
            then.status(200)
                .json_body(json!({"documents": [order("a")], "next_page": 2}));
        });
        let page2 = server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "2");
            then.status(200)
                .json_body(json!({"documents": [order("b")], "next_page": null}));
        });

        let orders = source(server.base_url()).fetch_orders(&window()).await.unwrap();

        page1.assert();
        page2.assert();
        assert_eq!(orders.len(), 2);
    }

    #[tokio::test]
    async fn test_short_page_ends_pagination() {
        let server = MockServer::start();
        let page1 = server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "1");
            then.status(200).json_body(json!([order("a")]));
        });
        let page2 = server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "2");
            then.status(200).json_body(json!([order("b")]));
        });

        let mut short = source(server.base_url());
        short.config.page_size = Some(50);
        let orders = short.fetch_orders(&window()).await.unwrap();

        page1.assert();
        page2.assert_hits(0);
        assert_eq!(orders.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_page_ends_pagination() {
        let server = MockServer::start();
        let any_page = server.mock(|when, then| {
            when.method(GET).path(PATH);
            then.status(200).json_body(json!([order("a"), order("b")]));
        });

        let orders = source(server.base_url()).fetch_orders(&window()).await.unwrap();

        any_page.assert_hits(2);
        assert_eq!(orders.len(), 2);
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_retries() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(GET).path(PATH);
            then.status(503);
        });

        let err = source(server.base_url())
            .fetch_orders(&window())
            .await
            .unwrap_err();

        failing.assert_hits(3);
        assert!(matches!(
            err,
            MonitorError::SourceUnavailableError { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start();
        let limited = server.mock(|when, then| {
            when.method(GET).path(PATH);
            then.status(429).header("Retry-After", "0");
        });

        let err = source(server.base_url())
            .fetch_orders(&window())
            .await
            .unwrap_err();

        limited.assert_hits(3);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let server = MockServer::start();
        let unauthorized = server.mock(|when, then| {
            when.method(GET).path(PATH);
            then.status(401).body("invalid key");
        });

        let err = source(server.base_url())
            .fetch_orders(&window())
            .await
            .unwrap_err();

        unauthorized.assert_hits(1);
        match err {
            MonitorError::SourceRequestError { status, message } => {
                assert_eq!(status, Some(401));
                assert!(message.contains("invalid key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_fails_immediately() {
        let server = MockServer::start();
        let garbage = server.mock(|when, then| {
            when.method(GET).path(PATH);
            then.status(200).body("<html>maintenance</html>");
        });

        let err = source(server.base_url())
            .fetch_orders(&window())
            .await
            .unwrap_err();

        garbage.assert_hits(1);
        assert!(matches!(err, MonitorError::SourceRequestError { .. }));
    }

    #[tokio::test]
    async fn test_later_page_failure_discards_earlier_pages() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "1");
            then.status(200).json_body(json!([order("a")]));
        });
        let page2 = server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "2");
            then.status(500);
        });

        let result = source(server.base_url()).fetch_orders(&window()).await;

        page2.assert_hits(3);
        assert!(matches!(
            result,
            Err(MonitorError::SourceUnavailableError { .. })
        ));
    }

    #[tokio::test]
    async fn test_network_error_is_transient() {
        let err = source("http://127.0.0.1:1".to_string())
            .fetch_orders(&window())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MonitorError::SourceUnavailableError { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_orders_without_id_are_skipped() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "1");
            then.status(200)
                .json_body(json!([order("a"), {"docNumber": "no-id"}]));
        });
        server.mock(|when, then| {
            when.method(GET).path(PATH).query_param("page", "2");
            then.status(200).json_body(json!([]));
        });

        let orders = source(server.base_url()).fetch_orders(&window()).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, "a");
    }

    #[tokio::test]
    async fn test_max_pages_bound() {
        let server = MockServer::start();
        for page in 1..=10 {
            server.mock(move |when, then| {
                when.method(GET)
                    .path(PATH)
                    .query_param("page", page.to_string());
                then.status(200)
                    .json_body(json!([order(&format!("order-{page}"))]));
            });
        }

        let mut pages = source(server.base_url());
        pages.config.max_pages = 3;
        let err = pages.fetch_orders(&window()).await.unwrap_err();
        assert!(matches!(err, MonitorError::SourceRequestError { status: None, .. }));
    }
}
