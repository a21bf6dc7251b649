//! 处理管道模块
//!
//! 成本估算、优先级车道、幂等账本和批次派发

pub mod batch;
pub mod estimator;
pub mod ledger;
pub mod queue;

// 重新导出主要类型
pub use batch::{BatchDispatcher, DispatchStatsSnapshot, WorkUnit, WorkerReport};
pub use estimator::CostEstimate;
pub use ledger::{Admission, Ledger, LedgerSnapshot, LedgerStatus};
pub use queue::{EnqueueOutcome, PriorityLanes, QueueStatus};
