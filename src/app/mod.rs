#[cfg(feature = "cli")]
pub mod commands;

use crate::adapters::notifier::{ConfiguredNotifier, DryRunNotifier, SmtpNotifier};
use crate::adapters::order_api::HttpOrderSource;
use crate::adapters::references::{
    ConfiguredReferenceFetcher, HttpReferenceFetcher, StorageReferenceFetcher,
};
use crate::adapters::storage::{LocalStorage, MemoryStorage, StateStorage};
use crate::config::MonitorConfig;
use crate::core::workflow::Workflow;
use crate::utils::error::{MonitorError, Result};

pub type MonitorWorkflow =
    Workflow<HttpOrderSource, ConfiguredReferenceFetcher, ConfiguredNotifier, StateStorage>;

/// 相對路徑以目前工作目錄為根
fn local_storage() -> LocalStorage {
    LocalStorage::new(".".to_string())
}

pub fn build_reference_fetcher(config: &MonitorConfig) -> Result<ConfiguredReferenceFetcher> {
    let references = &config.references;
    match (&references.path, &references.url) {
        (Some(path), _) => Ok(ConfiguredReferenceFetcher::File(
            StorageReferenceFetcher::new(local_storage(), path.clone()),
        )),
        (None, Some(url)) => Ok(ConfiguredReferenceFetcher::Http(HttpReferenceFetcher::new(
            url.clone(),
            references.bearer_token.clone(),
            config.reference_timeout(),
        )?)),
        (None, None) => Err(MonitorError::MissingConfigError {
            field: "references.path or references.url".to_string(),
        }),
    }
}

/// 依設定組出完整流程。測試模式改用 dry-run 通知端，帳本寫入只留在記憶體
pub async fn build_workflow(config: &MonitorConfig) -> Result<MonitorWorkflow> {
    let workflow_config = config.workflow_config()?;
    let timezone = config.timezone()?;
    let source = HttpOrderSource::new(config.order_api_config())?;
    let references = build_reference_fetcher(config)?;

    let (notifier, storage) = if config.is_dry_run() {
        tracing::info!("🧪 Test mode: e-mails are only logged, ledger changes stay in memory");
        let seeded = MemoryStorage::seeded_from(&local_storage(), &config.ledger.path).await?;
        (
            ConfiguredNotifier::DryRun(DryRunNotifier::new(config.subject_prefix(), timezone)),
            StateStorage::Memory(seeded),
        )
    } else {
        (
            ConfiguredNotifier::Smtp(SmtpNotifier::new(&config.smtp_settings()?, timezone)?),
            StateStorage::Local(local_storage()),
        )
    };

    Ok(Workflow::new(
        workflow_config,
        source,
        references,
        notifier,
        storage,
    ))
}
