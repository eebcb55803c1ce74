//! 任务与复制状态的持久化
//!
//! [`JsonFileStore`] 把全部任务写入数据目录下的 `tasks.json`，
//! 把 tribe 复制状态快照写入 `tribe.json`。每次写入先写临时文件再重命名，
//! 进程在写入中途退出不会留下半个文件。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pulse_core::models::{Task, TaskId, TribeSnapshot};
use pulse_core::{PulseError, PulseResult, TaskStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

const TASKS_FILE: &str = "tasks.json";
const TRIBE_FILE: &str = "tribe.json";

pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// 打开（必要时创建）数据目录
    pub async fn open(dir: impl AsRef<Path>) -> PulseResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            PulseError::Storage(format!("创建数据目录 {} 失败: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_json<T: DeserializeOwned + Default>(&self, file: &str) -> PulseResult<T> {
        let path = self.dir.join(file);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(PulseError::Storage(format!(
                "读取 {} 失败: {e}",
                path.display()
            ))),
        }
    }

    async fn write_json<T: Serialize>(&self, file: &str, value: &T) -> PulseResult<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{file}.tmp"));
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "持久化完成");
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn save_task(&self, task: &Task) -> PulseResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tasks: BTreeMap<TaskId, Task> = self.read_json(TASKS_FILE).await?;
        tasks.insert(task.id.clone(), task.clone());
        self.write_json(TASKS_FILE, &tasks).await
    }

    async fn delete_task(&self, id: &TaskId) -> PulseResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tasks: BTreeMap<TaskId, Task> = self.read_json(TASKS_FILE).await?;
        if tasks.remove(id).is_some() {
            self.write_json(TASKS_FILE, &tasks).await?;
        }
        Ok(())
    }

    async fn load_tasks(&self) -> PulseResult<Vec<Task>> {
        let tasks: BTreeMap<TaskId, Task> = self.read_json(TASKS_FILE).await?;
        Ok(tasks.into_values().collect())
    }

    async fn save_tribe_snapshot(&self, snapshot: &TribeSnapshot) -> PulseResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(TRIBE_FILE, snapshot).await
    }

    async fn load_tribe_snapshot(&self) -> PulseResult<Option<TribeSnapshot>> {
        self.read_json(TRIBE_FILE).await
    }
}

/// 仅存在于内存中的存储，用于测试和禁用持久化的节点
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    tribe: RwLock<Option<TribeSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn save_task(&self, task: &Task) -> PulseResult<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete_task(&self, id: &TaskId) -> PulseResult<()> {
        self.tasks.write().await.remove(id);
        Ok(())
    }

    async fn load_tasks(&self) -> PulseResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn save_tribe_snapshot(&self, snapshot: &TribeSnapshot) -> PulseResult<()> {
        *self.tribe.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn load_tribe_snapshot(&self) -> PulseResult<Option<TribeSnapshot>> {
        Ok(self.tribe.read().await.clone())
    }
}
