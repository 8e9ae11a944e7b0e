use crate::domain::ports::Storage;
use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub const LEDGER_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub order_id: String,
    pub notified_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    updated_at: Option<DateTime<Utc>>,
    entries: Vec<LedgerEntry>,
}

/// 舊版追蹤檔：`{"processed_orders": {"<id>": "<iso timestamp>"}}`
#[derive(Debug, Deserialize)]
struct LegacyLedgerFile {
    processed_orders: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub location: String,
    pub total: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// 已通知訂單的持久化紀錄。每筆成功通知後立即整份寫回儲存
pub struct NotificationLedger<S: Storage> {
    storage: S,
    location: String,
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl<S: Storage> NotificationLedger<S> {
    /// 載入帳本；檔案不存在視為第一次執行 (空帳本)，內容無法解析則回報損毀
    pub async fn load(storage: S, location: &str) -> Result<Self> {
        let entries = match storage.read_file(location).await {
            Ok(bytes) => parse_ledger(&bytes, location)?,
            Err(MonitorError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("📒 No ledger at '{}', starting with an empty one", location);
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        tracing::debug!("📒 Loaded {} ledger entries from '{}'", entries.len(), location);

        Ok(Self {
            storage,
            location: location.to_string(),
            entries,
        })
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.entries.contains_key(order_id)
    }

    /// 記錄並立即寫回；已存在的 id 保留原時間且不寫檔。寫入失敗時撤銷記憶體中的新增
    pub async fn record_and_persist(
        &mut self,
        order_id: &str,
        notified_at: DateTime<Utc>,
    ) -> Result<bool> {
        if self.contains(order_id) {
            return Ok(false);
        }

        self.entries.insert(order_id.to_string(), notified_at);
        if let Err(e) = self.persist().await {
            self.entries.remove(order_id);
            return Err(e);
        }
        Ok(true)
    }

    /// 維護用：刪除早於 cutoff 的紀錄，回傳刪除筆數
    pub async fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<usize> {
        let before = self.entries.clone();
        self.entries.retain(|_, notified_at| *notified_at >= cutoff);
        let removed = before.len() - self.entries.len();

        if removed > 0 {
            if let Err(e) = self.persist().await {
                self.entries = before;
                return Err(e);
            }
        }
        Ok(removed)
    }

    async fn persist(&self) -> Result<()> {
        let file = LedgerFile {
            version: LEDGER_FORMAT_VERSION,
            updated_at: Some(Utc::now()),
            entries: self.entries(),
        };
        let data = serde_json::to_vec_pretty(&file)?;
        self.storage.write_file(&self.location, &data).await
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .map(|(order_id, notified_at)| LedgerEntry {
                order_id: order_id.clone(),
                notified_at: *notified_at,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            location: self.location.clone(),
            total: self.entries.len(),
            oldest: self.entries.values().min().copied(),
            newest: self.entries.values().max().copied(),
        }
    }
}

fn corrupt(location: &str, message: impl Into<String>) -> MonitorError {
    MonitorError::LedgerCorruptError {
        location: location.to_string(),
        message: message.into(),
    }
}

fn parse_ledger(bytes: &[u8], location: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| corrupt(location, format!("invalid JSON: {e}")))?;

    let Some(obj) = value.as_object() else {
        return Err(corrupt(location, "top-level value is not an object"));
    };

    if obj.contains_key("version") {
        let file: LedgerFile = serde_json::from_value(value)
            .map_err(|e| corrupt(location, format!("invalid ledger layout: {e}")))?;

        if file.version != LEDGER_FORMAT_VERSION {
            return Err(corrupt(
                location,
                format!("unsupported ledger version {}", file.version),
            ));
        }

        let mut entries = BTreeMap::new();
        for entry in file.entries {
            if entries.insert(entry.order_id.clone(), entry.notified_at).is_some() {
                return Err(corrupt(
                    location,
                    format!("order id '{}' is listed more than once", entry.order_id),
                ));
            }
        }
        return Ok(entries);
    }

    if obj.contains_key("processed_orders") {
        let legacy: LegacyLedgerFile = serde_json::from_value(value)
            .map_err(|e| corrupt(location, format!("invalid legacy ledger: {e}")))?;
        tracing::info!("📒 Migrating legacy ledger '{}' on next write", location);

        return legacy
            .processed_orders
            .into_iter()
            .map(|(order_id, raw)| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|ts| (order_id.clone(), ts.with_timezone(&Utc)))
                    .map_err(|e| {
                        corrupt(location, format!("bad timestamp '{raw}' for '{order_id}': {e}"))
                    })
            })
            .collect();
    }

    Err(corrupt(location, "unrecognized ledger format"))
}
