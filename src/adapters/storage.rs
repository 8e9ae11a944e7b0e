use crate::domain::ports::Storage;
use crate::utils::error::{MonitorError, Result};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: String,
}

impl LocalStorage {
    pub fn new(base_path: String) -> Self {
        Self { base_path }
    }

    /// 絕對路徑直接使用，相對路徑以 base_path 為根
    pub fn resolve(&self, path: &str) -> PathBuf {
        Path::new(&self.base_path).join(path)
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let data = fs::read(self.resolve(path))?;
        Ok(data)
    }

    /// 先寫入同目錄的暫存檔並 fsync，再以 rename 取代目標檔
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.resolve(path);
        let parent = match full_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut temp_file = NamedTempFile::new_in(&parent)?;
        temp_file.write_all(data)?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(&full_path).map_err(|e| e.error)?;

        tracing::debug!("💾 Wrote {} bytes to {}", data.len(), full_path.display());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<String, Vec<u8>>,
    writes: usize,
    fail_writes: bool,
}

/// 記憶體內儲存：測試模式下承接帳本寫入，測試中作為替身
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_file(path: &str, data: &[u8]) -> Self {
        let storage = Self::new();
        storage
            .state
            .lock()
            .await
            .files
            .insert(path.to_string(), data.to_vec());
        storage
    }

    /// 以另一個儲存中的檔案作為初始內容；來源沒有該檔案時保持空白
    pub async fn seeded_from<S: Storage>(source: &S, path: &str) -> Result<Self> {
        match source.read_file(path).await {
            Ok(data) => Ok(Self::with_file(path, &data).await),
            Err(MonitorError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::new())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().await.files.get(path).cloned()
    }

    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes
    }

    pub async fn fail_writes(&self, fail: bool) {
        self.state.lock().await.fail_writes = fail;
    }
}

impl Storage for MemoryStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        state.files.get(path).cloned().ok_or_else(|| {
            MonitorError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path),
            ))
        })
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_writes {
            return Err(MonitorError::IoError(std::io::Error::other(format!(
                "write to {} rejected",
                path
            ))));
        }
        state.files.insert(path.to_string(), data.to_vec());
        state.writes += 1;
        Ok(())
    }
}

/// CLI 依模式選擇帳本儲存位置
#[derive(Debug, Clone)]
pub enum StateStorage {
    Local(LocalStorage),
    Memory(MemoryStorage),
}

impl Storage for StateStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        match self {
            StateStorage::Local(storage) => storage.read_file(path).await,
            StateStorage::Memory(storage) => storage.read_file(path).await,
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        match self {
            StateStorage::Local(storage) => storage.write_file(path, data).await,
            StateStorage::Memory(storage) => storage.write_file(path, data).await,
        }
    }
}
