pub mod plugin;
pub mod storage;
pub mod task_port;

pub use plugin::*;
pub use storage::*;
pub use task_port::*;
