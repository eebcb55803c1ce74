use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pulse_core::models::{ConfigMap, PluginFilter, PluginInfo, PluginKey};
use pulse_core::{PluginCatalog, PluginInstance, PulseError, PulseResult};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::builtin_plugins;

/// 已安装（可加载）的插件
struct Installed {
    instance: Arc<dyn PluginInstance>,
    signed: bool,
    defaults: ConfigMap,
}

/// 进程内插件目录
///
/// 区分“已安装”和“已加载”两个集合：只有已安装的插件才能被加载，
/// 只有已加载的插件才能被工作流解析执行。
pub struct InMemoryPluginCatalog {
    installed: RwLock<HashMap<PluginKey, Installed>>,
    loaded: RwLock<HashMap<PluginKey, PluginInfo>>,
}

impl InMemoryPluginCatalog {
    pub fn new() -> Self {
        Self {
            installed: RwLock::new(HashMap::new()),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// 安装全部内置插件（不自动加载）
    pub fn with_builtins() -> Self {
        let installed = builtin_plugins::all()
            .into_iter()
            .map(|(key, instance)| {
                (
                    key,
                    Installed {
                        instance,
                        signed: true,
                        defaults: ConfigMap::new(),
                    },
                )
            })
            .collect();
        Self {
            installed: RwLock::new(installed),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// 安装一个插件实例，已存在时覆盖
    pub async fn install(&self, key: PluginKey, instance: Arc<dyn PluginInstance>) {
        debug!(plugin = %key, "安装插件");
        self.installed.write().await.insert(
            key,
            Installed {
                instance,
                signed: false,
                defaults: ConfigMap::new(),
            },
        );
    }

    /// 安装并立即加载
    pub async fn install_loaded(
        &self,
        key: PluginKey,
        instance: Arc<dyn PluginInstance>,
    ) -> PulseResult<PluginInfo> {
        self.install(key.clone(), instance).await;
        self.load(&key).await
    }

    /// 加载所有已安装但尚未加载的插件
    pub async fn load_all(&self) -> PulseResult<Vec<PluginInfo>> {
        let keys: Vec<PluginKey> = self.installed.read().await.keys().cloned().collect();
        let mut infos = Vec::new();
        for key in keys {
            if self.loaded.read().await.contains_key(&key) {
                continue;
            }
            infos.push(self.load(&key).await?);
        }
        Ok(infos)
    }

    fn not_found(key: &PluginKey) -> PulseError {
        PulseError::PluginNotFound {
            key: key.to_string(),
        }
    }
}

impl Default for InMemoryPluginCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginCatalog for InMemoryPluginCatalog {
    async fn resolve(&self, key: &PluginKey) -> PulseResult<Arc<dyn PluginInstance>> {
        if !self.loaded.read().await.contains_key(key) {
            return Err(Self::not_found(key));
        }
        self.installed
            .read()
            .await
            .get(key)
            .map(|p| p.instance.clone())
            .ok_or_else(|| Self::not_found(key))
    }

    async fn is_loadable(&self, key: &PluginKey) -> bool {
        self.installed.read().await.contains_key(key)
    }

    async fn list(&self, filter: &PluginFilter) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self
            .loaded
            .read()
            .await
            .values()
            .filter(|info| filter.matches(&info.key))
            .cloned()
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    async fn get(&self, key: &PluginKey) -> PulseResult<PluginInfo> {
        self.loaded
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))
    }

    async fn load(&self, key: &PluginKey) -> PulseResult<PluginInfo> {
        let installed = self.installed.read().await;
        let plugin = installed.get(key).ok_or_else(|| Self::not_found(key))?;

        let mut loaded = self.loaded.write().await;
        if loaded.contains_key(key) {
            return Err(PulseError::conflict(format!("插件已加载: {key}")));
        }

        let info = PluginInfo {
            key: key.clone(),
            signed: plugin.signed,
            loaded_at: Utc::now(),
            config: plugin.defaults.clone(),
        };
        loaded.insert(key.clone(), info.clone());
        info!(plugin = %key, "插件已加载");
        Ok(info)
    }

    async fn unload(&self, key: &PluginKey) -> PulseResult<PluginInfo> {
        let info = self
            .loaded
            .write()
            .await
            .remove(key)
            .ok_or_else(|| Self::not_found(key))?;
        info!(plugin = %key, "插件已卸载");
        Ok(info)
    }

    async fn config(&self, key: &PluginKey) -> PulseResult<ConfigMap> {
        Ok(self.get(key).await?.config)
    }

    async fn set_config(&self, key: &PluginKey, items: ConfigMap) -> PulseResult<ConfigMap> {
        let mut loaded = self.loaded.write().await;
        let info = loaded.get_mut(key).ok_or_else(|| Self::not_found(key))?;
        info.config.extend(items);
        Ok(info.config.clone())
    }

    async fn delete_config(&self, key: &PluginKey, names: &[String]) -> PulseResult<ConfigMap> {
        let mut loaded = self.loaded.write().await;
        let info = loaded.get_mut(key).ok_or_else(|| Self::not_found(key))?;
        for name in names {
            info.config.remove(name);
        }
        Ok(info.config.clone())
    }
}
