//! pulse 节点进程：组装任务管理器、部落管理器与 gossip 服务。

pub mod app;
pub mod node;
pub mod shutdown;

pub use app::Application;
pub use node::{Node, NodeParts};
pub use shutdown::ShutdownManager;
