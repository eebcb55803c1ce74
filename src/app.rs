use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{info, warn};

use pulse_api::{create_routes, AppState, HttpTransport};
use pulse_core::config::AppConfig;
use pulse_core::models::Member;
use pulse_core::TaskStore;
use pulse_infrastructure::{
    init_metrics_exporter, InMemoryMetricCatalog, InMemoryPluginCatalog, JsonFileStore,
    MetricsCollector,
};

use crate::node::{Node, NodeParts};

/// 主应用程序
pub struct Application {
    config: AppConfig,
    node: Node,
}

impl Application {
    /// 按配置组装节点并恢复持久化状态
    pub async fn new(config: AppConfig) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new());
        if config.observability.metrics_enabled {
            let bind: SocketAddr = config
                .observability
                .metrics_bind_address
                .parse()
                .context("解析指标监听地址失败")?;
            init_metrics_exporter(bind)?;
        }

        let store = open_store(&config).await?;

        let plugins = Arc::new(InMemoryPluginCatalog::with_builtins());
        let loaded = plugins.load_all().await.context("加载内置插件失败")?;
        info!(plugins = loaded.len(), "内置插件已加载");

        let transport = Arc::new(
            HttpTransport::new(config.tribe.request_timeout()).context("创建gossip客户端失败")?,
        );

        let member = Member::new(member_name(&config)?, config.api.advertised())
            .with_tags(config.node.tags.clone());
        info!(member = %member.name, address = %member.address, "初始化节点");

        let node = Node::new(
            &config,
            NodeParts {
                member,
                plugins,
                metric_catalog: Arc::new(InMemoryMetricCatalog::with_builtins()),
                transport,
                store,
                metrics,
            },
        );
        node.restore().await.context("恢复节点状态失败")?;

        Ok(Self { config, node })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// 启动 gossip 服务与部落后台循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let bind_address = &self.config.api.bind_address;
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {bind_address}"))?;

        let router = create_routes(AppState {
            node_name: self.node.tribe().local_name().to_string(),
            gossip: self.node.tribe().clone(),
        });

        if self.config.tribe.enabled {
            self.node.tribe().start().await;
            info!(%bind_address, seeds = ?self.config.tribe.seeds, "gossip 服务已启动");
        } else {
            info!(%bind_address, "部落 gossip 已禁用，仅响应对端请求");
        }

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("gossip 服务收到关闭信号");
            })
            .await;

        self.node.shutdown().await;
        served.context("gossip 服务运行失败")?;
        info!("节点已停止");
        Ok(())
    }
}

async fn open_store(config: &AppConfig) -> Result<Option<Arc<dyn TaskStore>>> {
    let data_dir = &config.storage.data_dir;
    if data_dir.is_empty() {
        warn!("未配置数据目录，任务与 agreement 仅保存在内存中");
        return Ok(None);
    }
    let store = JsonFileStore::open(data_dir)
        .await
        .with_context(|| format!("打开数据目录失败: {data_dir}"))?;
    info!(dir = %store.dir().display(), "使用 JSON 文件存储");
    Ok(Some(Arc::new(store)))
}

/// 未配置成员名时使用主机名
fn member_name(config: &AppConfig) -> Result<String> {
    if !config.node.name.is_empty() {
        return Ok(config.node.name.clone());
    }
    let host = hostname::get().context("获取主机名失败")?;
    Ok(host.to_string_lossy().into_owned())
}
