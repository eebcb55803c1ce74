//! Test data builders for workflows, task specs and task definitions
//!
//! Defaults line up with the plugins and metrics registered by
//! [`crate::helpers::TestCatalogs`].

use std::time::Duration;

use pulse_core::models::{
    PluginKey, Schedule, Stage, TaskDefinition, TaskId, TaskSpec, Workflow,
};

pub fn test_collector() -> PluginKey {
    PluginKey::collector("test", 1)
}

pub fn test_publisher() -> PluginKey {
    PluginKey::publisher("recorder", 1)
}

/// Builder for creating test workflows
pub struct WorkflowBuilder {
    collect: Stage,
    publish: Vec<Stage>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self {
            collect: Stage::collect(test_collector(), vec!["/test/foo".to_string()]),
            publish: Vec::new(),
        }
    }

    pub fn with_collector(mut self, plugin: PluginKey, metrics: &[&str]) -> Self {
        self.collect = Stage::collect(plugin, metrics.iter().map(|m| m.to_string()).collect());
        self
    }

    pub fn with_publisher(mut self, plugin: PluginKey) -> Self {
        self.publish.push(Stage::publish(plugin));
        self
    }

    /// Uses the recording publisher when no publisher was added
    pub fn build(self) -> Workflow {
        let mut stages = vec![self.collect];
        if self.publish.is_empty() {
            stages.push(Stage::publish(test_publisher()));
        } else {
            stages.extend(self.publish);
        }
        Workflow::new(stages)
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test task specs
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec {
                name: Some("test_task".to_string()),
                workflow: WorkflowBuilder::new().build(),
                schedule: Schedule::simple(Duration::from_secs(1)),
                deadline: None,
                start: false,
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.spec.name = Some(name.to_string());
        self
    }

    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.spec.workflow = workflow;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.spec.schedule = schedule;
        self
    }

    pub fn with_interval(self, interval: Duration) -> Self {
        self.with_schedule(Schedule::simple(interval))
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.spec.deadline = Some(deadline);
        self
    }

    pub fn started(mut self) -> Self {
        self.spec.start = true;
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

impl Default for TaskSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for replicable task definitions
pub struct TaskDefinitionBuilder {
    definition: TaskDefinition,
}

impl TaskDefinitionBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            definition: TaskDefinition {
                id: TaskId::from(id),
                name: format!("task-{id}"),
                workflow: WorkflowBuilder::new().build(),
                schedule: Schedule::simple(Duration::from_secs(1)),
                deadline: Duration::from_secs(5),
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.definition.name = name.to_string();
        self
    }

    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.definition.workflow = workflow;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.definition.schedule = schedule;
        self
    }

    pub fn build(self) -> TaskDefinition {
        self.definition
    }
}
