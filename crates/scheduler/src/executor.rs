use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument};

use pulse_core::models::{Metric, Stage, StagePayload, Workflow};
use pulse_core::{MetricCatalog, PluginCatalog, PulseError, PulseResult};

/// 一次工作流执行的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// 采集阶段产出的指标数
    pub collected: usize,
    /// 成功执行的发布阶段数
    pub published: usize,
    pub elapsed: Duration,
}

/// 工作流执行器
///
/// 按 collect → process* → publish+ 的顺序执行阶段。截止时间是建议性的：
/// 只在阶段之间和执行结束后检查，超时的执行被判定为失败。
pub struct WorkflowExecutor {
    plugins: Arc<dyn PluginCatalog>,
    metric_catalog: Arc<dyn MetricCatalog>,
}

impl WorkflowExecutor {
    pub fn new(plugins: Arc<dyn PluginCatalog>, metric_catalog: Arc<dyn MetricCatalog>) -> Self {
        Self {
            plugins,
            metric_catalog,
        }
    }

    #[instrument(skip(self, workflow), fields(stages = workflow.stages.len()))]
    pub async fn execute(&self, workflow: &Workflow, deadline: Duration) -> PulseResult<RunReport> {
        let started = Instant::now();

        let collect = workflow
            .collect_stage()
            .ok_or_else(|| PulseError::RunFailure("工作流缺少采集阶段".to_string()))?;
        let definitions = self
            .metric_catalog
            .resolve(&collect.metrics)
            .await
            .map_err(|e| PulseError::RunFailure(format!("解析采集指标失败: {e}")))?;
        let requested: StagePayload = definitions.iter().map(Metric::requested).collect();

        let mut payload = self.run_stage(collect, requested).await?;
        let collected = payload.len();
        check_deadline(started, deadline, collect)?;

        for stage in workflow.process_stages() {
            payload = self.run_stage(stage, payload).await?;
            check_deadline(started, deadline, stage)?;
        }

        let mut published = 0;
        for stage in workflow.publish_stages() {
            self.run_stage(stage, payload.clone()).await?;
            published += 1;
            check_deadline(started, deadline, stage)?;
        }

        let elapsed = started.elapsed();
        debug!(collected, published, elapsed_ms = elapsed.as_millis() as u64, "工作流执行完成");
        Ok(RunReport {
            collected,
            published,
            elapsed,
        })
    }

    async fn run_stage(&self, stage: &Stage, input: StagePayload) -> PulseResult<StagePayload> {
        let plugin = self
            .plugins
            .resolve(&stage.plugin)
            .await
            .map_err(|e| PulseError::RunFailure(format!("无法解析插件 {}: {e}", stage.plugin)))?;

        // 阶段配置覆盖插件级配置
        let mut config = self.plugins.config(&stage.plugin).await.unwrap_or_default();
        config.extend(stage.config.clone());

        plugin
            .run(input, &config)
            .await
            .map_err(|e| PulseError::RunFailure(format!("插件 {} 执行失败: {e}", stage.plugin)))
    }
}

fn check_deadline(started: Instant, deadline: Duration, stage: &Stage) -> PulseResult<()> {
    let elapsed = started.elapsed();
    if elapsed > deadline {
        return Err(PulseError::RunFailure(format!(
            "执行超过截止时间 {}ms（阶段 {} 结束时已耗时 {}ms）",
            deadline.as_millis(),
            stage.plugin,
            elapsed.as_millis()
        )));
    }
    Ok(())
}
