use clap::Parser;
use order_monitor::app::commands;
use order_monitor::config::cli::Cli;
use order_monitor::utils::validation::Validate;
use order_monitor::utils::logger;
use order_monitor::{MonitorConfig, MonitorError};

#[tokio::main]
async fn main() {
    // .env 不存在時忽略
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = MonitorConfig::from_file(&cli.config).map_err(|e| match e {
        MonitorError::IoError(io) => {
            MonitorError::config(format!("cannot read '{}': {}", cli.config, io))
        }
        other => other,
    });

    // 初始化日誌
    let verbose = cli.verbose || config.as_ref().is_ok_and(|c| c.mode.test_mode);
    if cli.json_logs {
        logger::init_json_logger(verbose);
    } else {
        logger::init_cli_logger(verbose);
    }

    tracing::info!("Starting order-monitor");

    let exit_code = match run(&cli, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(
                "❌ order-monitor failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            // 輸出用戶友好的錯誤信息
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 根據錯誤嚴重程度決定退出碼
            e.severity().exit_code()
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: &Cli, config: order_monitor::Result<MonitorConfig>) -> order_monitor::Result<i32> {
    let config = config?;
    tracing::debug!("Configuration: {:?}", config);

    // 驗證配置
    config.validate()?;

    commands::dispatch(cli, config).await
}
