use super::DEFAULT_CONFIG_PATH;
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "order-monitor")]
#[command(about = "Watches the sales-order API and e-mails new orders that contain monitored items")]
pub struct Cli {
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    #[arg(long, short, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, global = true, help = "Log process CPU and memory usage per run")]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// 執行一次檢查
    Check {
        #[arg(long, help = "Print the run report as JSON")]
        json: bool,
    },
    /// 檢查參考檔、訂單 API 與通知端的連線
    Test {
        #[arg(long, help = "Also send one short test e-mail to the recipients")]
        send_test_email: bool,
    },
    /// 顯示設定、營業時間與帳本狀態
    Status,
    /// 每 N 分鐘執行一次檢查，直到 Ctrl-C
    Schedule {
        #[arg(long)]
        interval_minutes: Option<u64>,
    },
    /// 刪除超過保留時間的帳本紀錄
    Prune {
        #[arg(long)]
        retention_hours: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check_with_globals() {
        let cli = Cli::parse_from(["order-monitor", "--verbose", "check", "--json", "--config", "x.toml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, "x.toml");
        assert!(matches!(cli.command, Command::Check { json: true }));
    }

    #[test]
    fn test_parse_schedule_and_prune() {
        let cli = Cli::parse_from(["order-monitor", "schedule", "--interval-minutes", "5"]);
        assert_eq!(cli.config, DEFAULT_CONFIG_PATH);
        assert!(matches!(
            cli.command,
            Command::Schedule {
                interval_minutes: Some(5)
            }
        ));

        let cli = Cli::parse_from(["order-monitor", "prune", "--retention-hours", "720"]);
        assert!(matches!(cli.command, Command::Prune { retention_hours: 720 }));
    }

    #[test]
    fn test_parse_test_with_send_flag() {
        let cli = Cli::parse_from(["order-monitor", "test"]);
        assert!(matches!(cli.command, Command::Test { send_test_email: false }));

        let cli = Cli::parse_from(["order-monitor", "test", "--send-test-email"]);
        assert!(matches!(cli.command, Command::Test { send_test_email: true }));
    }

    #[test]
    fn test_prune_requires_retention() {
        assert!(Cli::try_parse_from(["order-monitor", "prune"]).is_err());
    }
}
