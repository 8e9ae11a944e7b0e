use crate::domain::model::{Order, OrderNotification, TimeWindow};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 整份讀取 / 整份原子替換的持久化儲存
pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

#[async_trait]
pub trait OrderSource: Send + Sync {
    /// 取得時間區間內的所有訂單；任何一頁失敗即整體失敗，不回傳部分結果
    async fn fetch_orders(&self, window: &TimeWindow) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait ReferenceFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>>;

    /// 給日誌與 status 使用的來源描述 (不含憑證)
    fn describe(&self) -> String;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &OrderNotification) -> Result<()>;

    async fn test_connection(&self) -> Result<()>;
}
