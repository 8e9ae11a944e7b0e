use crate::core::gate::OperatingHours;
use crate::core::ledger::NotificationLedger;
use crate::core::references::{ReferenceOptions, ReferenceSet};
use crate::domain::model::{OrderNotification, TimeWindow};
use crate::domain::ports::{Notifier, OrderSource, ReferenceFetcher, Storage};
use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    GateChecked,
    WindowComputed,
    ReferencesLoaded,
    OrdersFetched,
    Filtered,
    Deduplicated,
    Notifying,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    OutsideOperatingHours,
    NothingToDo,
    Completed,
    CompletedWithFailures,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::CompletedWithFailures)
    }

    /// 有通知失敗的執行以 2 結束，與可重試錯誤相同
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            2
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationFailure {
    pub order_id: String,
    pub document_number: Option<String>,
    pub message: String,
}

/// 單次執行的摘要
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub within_operating_hours: bool,
    pub window: Option<TimeWindow>,
    pub references_loaded: usize,
    pub fetched: usize,
    pub matched: usize,
    pub already_notified: usize,
    pub duplicates_in_fetch: usize,
    pub notified: usize,
    pub failed: usize,
    pub warnings: Vec<String>,
    pub failures: Vec<NotificationFailure>,
    pub final_state: RunState,
    pub outcome: RunOutcome,
    pub duration_ms: u64,
}

impl RunReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            within_operating_hours: false,
            window: None,
            references_loaded: 0,
            fetched: 0,
            matched: 0,
            already_notified: 0,
            duplicates_in_fetch: 0,
            notified: 0,
            failed: 0,
            warnings: Vec::new(),
            failures: Vec::new(),
            final_state: RunState::Idle,
            outcome: RunOutcome::NothingToDo,
            duration_ms: 0,
        }
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        if !self.within_operating_hours {
            let _ = writeln!(out, "Outside operating hours, nothing checked.");
            return out;
        }

        if let Some(window) = &self.window {
            let _ = writeln!(out, "Window:            {} → {}", window.start, window.end);
        }
        let _ = writeln!(out, "References loaded: {}", self.references_loaded);
        let _ = writeln!(out, "Orders fetched:    {}", self.fetched);
        let _ = writeln!(out, "Matched:           {}", self.matched);
        let _ = writeln!(out, "Already notified:  {}", self.already_notified);
        let _ = writeln!(out, "Notified:          {}", self.notified);
        let _ = writeln!(out, "Failed:            {}", self.failed);
        for failure in &self.failures {
            let _ = writeln!(
                out,
                "  ✗ {}: {}",
                failure.document_number.as_deref().unwrap_or(&failure.order_id),
                failure.message
            );
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "  ⚠ {}", warning);
        }
        out
    }
}

/// 引擎啟動後不再變動的設定
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub operating_hours: OperatingHours,
    pub lookback: Duration,
    pub ledger_location: String,
    pub reference_options: ReferenceOptions,
}

struct Run {
    state: RunState,
    report: RunReport,
}

impl Run {
    fn advance(&mut self, next: RunState) {
        tracing::debug!("🔀 {:?} → {:?}", self.state, next);
        self.state = next;
        self.report.final_state = next;
    }
}

/// 訂單監控流程：營業時間 → 時間窗 → 參考集合 → 取單 → 過濾 → 去重 → 通知
pub struct Workflow<O, F, N, S>
where
    O: OrderSource,
    F: ReferenceFetcher,
    N: Notifier,
    S: Storage + Clone,
{
    config: WorkflowConfig,
    source: O,
    references: F,
    notifier: N,
    ledger_storage: S,
}

impl<O, F, N, S> Workflow<O, F, N, S>
where
    O: OrderSource,
    F: ReferenceFetcher,
    N: Notifier,
    S: Storage + Clone,
{
    pub fn new(config: WorkflowConfig, source: O, references: F, notifier: N, ledger_storage: S) -> Self {
        Self {
            config,
            source,
            references,
            notifier,
            ledger_storage,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn source(&self) -> &O {
        &self.source
    }

    pub fn references(&self) -> &F {
        &self.references
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn ledger_storage(&self) -> &S {
        &self.ledger_storage
    }

    pub async fn run(&self) -> Result<RunReport> {
        self.run_at(Utc::now()).await
    }

    /// 以指定時間執行一次。回傳 Err 代表執行中止 (Aborted)
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let started = Instant::now();
        let mut run = Run {
            state: RunState::Idle,
            report: RunReport::new(now),
        };

        match self.execute(&mut run, now).await {
            Ok(()) => {
                run.advance(RunState::Done);
                run.report.duration_ms = started.elapsed().as_millis() as u64;
                log_completion(&run.report);
                Ok(run.report)
            }
            Err(e) => {
                tracing::error!(
                    "❌ Run aborted during {:?}: {} (Category: {:?}, Severity: {:?})",
                    run.state,
                    e,
                    e.category(),
                    e.severity()
                );
                run.advance(RunState::Aborted);
                Err(e)
            }
        }
    }

    async fn execute(&self, run: &mut Run, now: DateTime<Utc>) -> Result<()> {
        let hours = &self.config.operating_hours;
        let open = hours.is_open_at(now);
        run.report.within_operating_hours = open;
        run.advance(RunState::GateChecked);

        if !open {
            tracing::info!(
                "🌙 Outside operating hours ({}), local time {}, next opening {}",
                hours.describe(),
                hours.local_time(now).format("%H:%M"),
                hours.next_opening(now).format("%Y-%m-%d %H:%M %Z")
            );
            run.report.outcome = RunOutcome::OutsideOperatingHours;
            return Ok(());
        }

        let window = TimeWindow::ending_at(now, self.config.lookback)?;
        run.report.window = Some(window);
        run.advance(RunState::WindowComputed);

        // 帳本損毀時必須在任何 API 請求之前中止
        let mut ledger =
            NotificationLedger::load(self.ledger_storage.clone(), &self.config.ledger_location)
                .await?;
        let references = self.load_references(run).await?;
        run.report.references_loaded = references.len();
        run.advance(RunState::ReferencesLoaded);

        let orders = self.source.fetch_orders(&window).await?;
        run.report.fetched = orders.len();
        run.advance(RunState::OrdersFetched);

        let matched: Vec<OrderNotification> = orders
            .iter()
            .filter_map(|order| {
                let lines = references.matching_lines(order);
                if lines.is_empty() {
                    return None;
                }
                Some(OrderNotification::new(
                    order,
                    lines.into_iter().cloned().collect(),
                ))
            })
            .collect();
        run.report.matched = matched.len();
        run.advance(RunState::Filtered);

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for notification in matched {
            if ledger.contains(&notification.order_id) {
                run.report.already_notified += 1;
                continue;
            }
            if !seen.insert(notification.order_id.clone()) {
                tracing::warn!(
                    "⚠️ Order {} appears more than once in this fetch",
                    notification.order_id
                );
                run.report.duplicates_in_fetch += 1;
                continue;
            }
            pending.push(notification);
        }
        run.advance(RunState::Deduplicated);

        tracing::info!(
            "🔎 {} fetched, {} matched, {} already notified, {} to notify",
            run.report.fetched,
            run.report.matched,
            run.report.already_notified,
            pending.len()
        );

        if pending.is_empty() {
            run.report.outcome = RunOutcome::NothingToDo;
            return Ok(());
        }

        run.advance(RunState::Notifying);
        for notification in &pending {
            match self.notifier.notify(notification).await {
                Ok(()) => {
                    // 寫入失敗就中止：後續通知將無法記錄
                    ledger.record_and_persist(&notification.order_id, now).await?;
                    run.report.notified += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Notification for order {} failed, continuing: {}",
                        notification.display_reference(),
                        e
                    );
                    run.report.failed += 1;
                    run.report.failures.push(NotificationFailure {
                        order_id: notification.order_id.clone(),
                        document_number: notification.document_number.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        run.report.outcome = if run.report.failed > 0 {
            RunOutcome::CompletedWithFailures
        } else {
            RunOutcome::Completed
        };
        Ok(())
    }

    /// 空的參考集合只記錄警告並以空集合繼續
    async fn load_references(&self, run: &mut Run) -> Result<ReferenceSet> {
        let bytes = self.references.fetch().await?;
        let options = &self.config.reference_options;

        match ReferenceSet::parse(&bytes, options) {
            Ok(set) => {
                tracing::info!(
                    "📋 Loaded {} reference identifiers ({} rows) from {}",
                    set.len(),
                    set.rows_read(),
                    self.references.describe()
                );
                Ok(set)
            }
            Err(MonitorError::EmptyReferenceSetError { column }) => {
                let warning = format!(
                    "reference file {} has no identifiers in column '{}'",
                    self.references.describe(),
                    column
                );
                tracing::warn!("⚠️ {}", warning);
                run.report.warnings.push(warning);
                Ok(ReferenceSet::empty(options.normalization()))
            }
            Err(e) => Err(e),
        }
    }
}

fn log_completion(report: &RunReport) {
    match report.outcome {
        RunOutcome::OutsideOperatingHours => {}
        RunOutcome::NothingToDo => {
            tracing::info!("✅ Nothing to notify ({} ms)", report.duration_ms)
        }
        RunOutcome::Completed => tracing::info!(
            "✅ Run completed: {} notification(s) sent ({} ms)",
            report.notified,
            report.duration_ms
        ),
        RunOutcome::CompletedWithFailures => tracing::warn!(
            "⚠️ Run completed with failures: {} sent, {} failed ({} ms)",
            report.notified,
            report.failed,
            report.duration_ms
        ),
    }
}
