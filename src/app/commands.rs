use super::{build_workflow, MonitorWorkflow};
use crate::config::cli::{Cli, Command};
use crate::config::{MonitorConfig, MAX_INTERVAL_MINUTES};
use crate::core::ledger::NotificationLedger;
use crate::core::references::ReferenceSet;
use crate::core::workflow::RunReport;
use crate::domain::model::TimeWindow;
use crate::domain::ports::{Notifier, ReferenceFetcher};
use crate::utils::error::{MonitorError, Result};
use crate::utils::monitor::ResourceMonitor;
use crate::utils::validation::validate_range;
use chrono::Utc;
use std::time::Duration;

/// 帳本保留時間上限 (約十年)
pub const MAX_RETENTION_HOURS: u64 = 24 * 366 * 10;

pub async fn dispatch(cli: &Cli, config: MonitorConfig) -> Result<i32> {
    let workflow = build_workflow(&config).await?;
    let monitor = ResourceMonitor::new(cli.monitor);
    if monitor.is_enabled() {
        tracing::info!("🔍 System monitoring enabled");
    }

    match &cli.command {
        Command::Check { json } => check(&workflow, *json, &monitor).await,
        Command::Test { send_test_email } => test(&workflow, *send_test_email).await,
        Command::Status => status(&config, &workflow).await,
        Command::Schedule { interval_minutes } => {
            let interval = schedule_interval(*interval_minutes, &config)?;
            schedule(&workflow, interval, &monitor).await
        }
        Command::Prune { retention_hours } => prune(&config, &workflow, *retention_hours).await,
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.summary());
    }
    Ok(())
}

/// 執行一次；回傳結束碼 (有通知失敗時為 2)
pub async fn check(workflow: &MonitorWorkflow, json: bool, monitor: &ResourceMonitor) -> Result<i32> {
    monitor.log_stats("Run started.");
    let report = workflow.run().await?;
    monitor.log_stats("Run completed.");

    print_report(&report, json)?;
    Ok(report.outcome.exit_code())
}

async fn load_reference_set(workflow: &MonitorWorkflow) -> Result<ReferenceSet> {
    let bytes = workflow.references().fetch().await?;
    ReferenceSet::parse(&bytes, &workflow.config().reference_options)
}

/// 依序檢查三個外部依賴 (可選擇再寄一封測試信)，任何一個失敗就回傳 1
pub async fn test(workflow: &MonitorWorkflow, send_test_email: bool) -> Result<i32> {
    let mut failures = 0;

    match load_reference_set(workflow).await {
        Ok(set) => println!(
            "✅ References: {} identifiers ({} rows) from {}",
            set.len(),
            set.rows_read(),
            workflow.references().describe()
        ),
        Err(e) => {
            failures += 1;
            println!("❌ References: {}", e);
        }
    }

    let now = Utc::now();
    let last_hour = TimeWindow::ending_at(now, chrono::Duration::hours(1))?;
    match workflow.source().test_connection(&last_hour).await {
        Ok(count) => println!("✅ Order API: {} orders in the last hour (first page)", count),
        Err(e) => {
            failures += 1;
            println!("❌ Order API: {}", e);
        }
    }

    match workflow.notifier().test_connection().await {
        Ok(()) if workflow.notifier().is_dry_run() => {
            println!("✅ Notifier: dry-run (test_email_only), nothing will be sent")
        }
        Ok(()) => println!("✅ Notifier: SMTP connection OK"),
        Err(e) => {
            failures += 1;
            println!("❌ Notifier: {}", e);
        }
    }

    if send_test_email {
        match workflow.notifier().send_test_message().await {
            Ok(()) if workflow.notifier().is_dry_run() => {
                println!("✅ Test e-mail: skipped in dry-run mode")
            }
            Ok(()) => println!("✅ Test e-mail: sent"),
            Err(e) => {
                failures += 1;
                println!("❌ Test e-mail: {}", e);
            }
        }
    }

    Ok(if failures == 0 { 0 } else { 1 })
}

pub async fn status(config: &MonitorConfig, workflow: &MonitorWorkflow) -> Result<i32> {
    let redacted = toml::to_string_pretty(&config.redacted())
        .map_err(|e| MonitorError::config(format!("cannot render configuration: {}", e)))?;
    println!("── Configuration ──\n{}", redacted);

    let hours = &workflow.config().operating_hours;
    let now = Utc::now();
    println!("── Operating hours ──");
    println!("Window:     {}", hours.describe());
    println!("Local time: {}", hours.local_time(now).format("%Y-%m-%d %H:%M %Z"));
    if hours.is_open_at(now) {
        println!("State:      open");
    } else {
        println!("State:      closed");
        println!(
            "Opens:      {}",
            hours.next_opening(now).format("%Y-%m-%d %H:%M %Z")
        );
    }

    println!("── Ledger ──");
    let ledger_path = &workflow.config().ledger_location;
    match NotificationLedger::load(workflow.ledger_storage().clone(), ledger_path).await {
        Ok(ledger) => {
            let stats = ledger.stats();
            println!("Location:   {}", stats.location);
            println!("Entries:    {}", stats.total);
            if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
                println!("Oldest:     {}", oldest);
                println!("Newest:     {}", newest);
            }
        }
        Err(e) => println!("❌ {}", e),
    }

    println!("── References ──");
    println!("Source:     {}", workflow.references().describe());
    match load_reference_set(workflow).await {
        Ok(set) => println!("Loaded:     {} identifiers ({} rows)", set.len(), set.rows_read()),
        Err(e) => println!("❌ {}", e),
    }

    Ok(0)
}

pub fn schedule_interval(override_minutes: Option<u64>, config: &MonitorConfig) -> Result<Duration> {
    let minutes = override_minutes.unwrap_or(config.schedule.interval_minutes);
    validate_range("--interval-minutes", minutes, 1, MAX_INTERVAL_MINUTES)?;
    Ok(Duration::from_secs(minutes * 60))
}

/// 每隔 interval 執行一次，直到收到 Ctrl-C；單次失敗只記錄，不中斷排程
pub async fn schedule(
    workflow: &MonitorWorkflow,
    interval: Duration,
    monitor: &ResourceMonitor,
) -> Result<i32> {
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!("⏰ Scheduler started, checking every {:?}", interval);

    loop {
        monitor.log_stats("Run started.");
        match workflow.run().await {
            Ok(report) => tracing::info!(
                "📊 Run finished: {:?} ({} notified, {} failed)",
                report.outcome,
                report.notified,
                report.failed
            ),
            Err(e) => {
                tracing::error!("❌ {}", e.user_friendly_message());
                tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
            }
        }
        monitor.log_stats("Run completed.");

        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            Ok(()) = shutdown_rx.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!("👋 Scheduler stopped");
    Ok(0)
}

/// 保留時間不可短於回溯時間窗，否則窗內的訂單會被重複通知
pub async fn prune(config: &MonitorConfig, workflow: &MonitorWorkflow, retention_hours: u64) -> Result<i32> {
    validate_range("--retention-hours", retention_hours, 1, MAX_RETENTION_HOURS)?;
    if retention_hours < config.schedule.lookback_hours {
        return Err(MonitorError::InvalidConfigValueError {
            field: "--retention-hours".to_string(),
            value: retention_hours.to_string(),
            reason: format!(
                "must be at least the lookback window ({} hours)",
                config.schedule.lookback_hours
            ),
        });
    }

    let mut ledger = NotificationLedger::load(
        workflow.ledger_storage().clone(),
        &workflow.config().ledger_location,
    )
    .await?;
    // 已受 MAX_RETENTION_HOURS 限制，轉換不會溢位
    let cutoff = Utc::now() - chrono::Duration::hours(retention_hours as i64);
    let removed = ledger.prune_older_than(cutoff).await?;

    tracing::info!("🧹 Pruned {} ledger entries older than {}", removed, cutoff);
    println!("🧹 Removed {} entries, {} remaining", removed, ledger.len());
    if config.is_dry_run() {
        println!("🧪 Test mode: the ledger file on disk was not modified");
    }
    Ok(0)
}
