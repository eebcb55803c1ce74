use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use pulse::shutdown::wait_for_signal;
use pulse::{Application, ShutdownManager};
use pulse_core::config::AppConfig;
use pulse_core::logging;

#[derive(Parser, Debug)]
#[command(name = "pulsed")]
#[command(version)]
#[command(about = "遥测采集任务调度节点")]
struct Cli {
    /// 配置文件路径，缺省时按默认位置查找
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 成员名，覆盖 node.name
    #[arg(long, value_name = "NAME")]
    node_name: Option<String>,

    /// gossip 服务监听地址，覆盖 api.bind_address
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// 种子节点地址，可重复指定
    #[arg(long = "seed", value_name = "ADDR")]
    seeds: Vec<String>,

    #[arg(short = 'l', long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    #[arg(long, value_parser = ["json", "pretty"])]
    log_format: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut AppConfig) {
        if let Some(name) = self.node_name {
            config.node.name = name;
        }
        if let Some(bind) = self.bind {
            config.api.bind_address = bind;
        }
        if !self.seeds.is_empty() {
            config.tribe.seeds = self.seeds;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone();
    let mut config = AppConfig::load(config_path.as_deref())
        .with_context(|| format!("加载配置失败: {}", config_path.as_deref().unwrap_or("<默认>")))?;
    cli.apply(&mut config);
    config.validate().context("配置验证失败")?;

    logging::init_from_config(&config.observability)?;
    info!(version = env!("CARGO_PKG_VERSION"), "启动 pulse 节点");

    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_signal().await;
    info!("开始优雅关闭...");
    shutdown_manager.shutdown().await;

    let drained = shutdown_manager
        .drain(Duration::from_secs(30), async {
            if let Err(e) = app_handle.await {
                error!("应用关闭时发生错误: {e}");
            }
        })
        .await;
    if drained {
        info!("pulse 节点已退出");
    }
    Ok(())
}
