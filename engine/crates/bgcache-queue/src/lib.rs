//! 后台加载的基础设施
//!
//! - [`ThreadSafeQueue`]：互斥锁保护的 FIFO 队列，支持按条件批量删除和加锁遍历
//! - [`ResourceLoader`]：单线程 worker，从输入队列取任务、调用解码策略、写入输出队列
//! - [`PriorityResourceLoader`]：带 primary/secondary 两个输入队列的变体
//! - [`TimingStats`]：滚动窗口的耗时统计

pub mod resource_loader;
pub mod stats;
pub mod ts_queue;

mod profile;

pub use resource_loader::{
    InputQueues, LoaderStats, PriorityQueues, PriorityResourceLoader, ResourceDecoder, ResourceLoader, SingleQueue,
};
pub use stats::{QueueDepth, TimingStats, TimingSummary};
pub use ts_queue::ThreadSafeQueue;

pub use tracy_client;
