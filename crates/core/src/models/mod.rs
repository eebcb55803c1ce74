//! # 数据模型
//!
//! 定义任务调度与部落(tribe)协同的核心数据结构。
//!
//! ## 核心模型
//!
//! ### Workflow / Schedule / Task
//! 任务把一个 collect → process → publish 的工作流绑定到调度策略上，
//! 并记录自己的生命周期状态与执行计数。
//!
//! ### Member / Agreement / GossipEvent
//! 成员通过 gossip 交换事件，agreement 是共享任务与插件集合的成员组。
//!
//! ## 状态管理
//!
//! ### 任务状态流转
//! ```text
//! Stopped → Spinning → Running → Spinning
//!              ↓          ↓
//!          Disabled     Ended
//! ```
//!
//! ### 成员状态流转
//! ```text
//! Unknown → Alive → Suspect → Dead
//! ```
//!
//! 所有时间字段使用 `DateTime<Utc>`，所有模型实现 serde 序列化，
//! 以便持久化到存储和在 gossip 中传输。

pub mod agreement;
pub mod clock;
pub mod member;
pub mod metric;
pub mod plugin;
pub mod schedule;
pub mod snapshot;
pub mod task;
pub mod workflow;

pub use agreement::*;
pub use clock::*;
pub use member::*;
pub use metric::*;
pub use plugin::*;
pub use schedule::*;
pub use snapshot::*;
pub use task::*;
pub use workflow::*;

/// 以毫秒整数序列化 `std::time::Duration`
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
