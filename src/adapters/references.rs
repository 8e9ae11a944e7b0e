use crate::adapters::storage::LocalStorage;
use crate::domain::ports::{ReferenceFetcher, Storage};
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// 從儲存 (本機檔案) 讀取參考檔
pub struct StorageReferenceFetcher<S: Storage> {
    storage: S,
    path: String,
}

impl<S: Storage> StorageReferenceFetcher<S> {
    pub fn new(storage: S, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
        }
    }
}

#[async_trait]
impl<S: Storage> ReferenceFetcher for StorageReferenceFetcher<S> {
    async fn fetch(&self) -> Result<Vec<u8>> {
        let data = self.storage.read_file(&self.path).await?;
        tracing::debug!("📄 Read {} bytes of references from {}", data.len(), self.path);
        Ok(data)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path)
    }
}

/// 以 HTTPS 下載參考檔，例如雲端硬碟的直接下載連結
pub struct HttpReferenceFetcher {
    client: Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpReferenceFetcher {
    pub fn new(url: impl Into<String>, bearer_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            bearer_token,
        })
    }
}

#[async_trait]
impl ReferenceFetcher for HttpReferenceFetcher {
    async fn fetch(&self) -> Result<Vec<u8>> {
        tracing::debug!("📄 Downloading references from {}", self.describe());

        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::SourceRequestError {
                status: Some(status.as_u16()),
                message: format!("reference download returned {}", status),
            });
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// 只顯示 host 與路徑，避免把簽名參數寫進日誌
    fn describe(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(url) => format!(
                "{}://{}{}",
                url.scheme(),
                url.host_str().unwrap_or_default(),
                url.path()
            ),
            Err(_) => "<invalid url>".to_string(),
        }
    }
}

/// 依設定選擇的參考檔來源
pub enum ConfiguredReferenceFetcher {
    File(StorageReferenceFetcher<LocalStorage>),
    Http(HttpReferenceFetcher),
}

#[async_trait]
impl ReferenceFetcher for ConfiguredReferenceFetcher {
    async fn fetch(&self) -> Result<Vec<u8>> {
        match self {
            ConfiguredReferenceFetcher::File(fetcher) => fetcher.fetch().await,
            ConfiguredReferenceFetcher::Http(fetcher) => fetcher.fetch().await,
        }
    }

    fn describe(&self) -> String {
        match self {
            ConfiguredReferenceFetcher::File(fetcher) => fetcher.describe(),
            ConfiguredReferenceFetcher::Http(fetcher) => fetcher.describe(),
        }
    }
}
