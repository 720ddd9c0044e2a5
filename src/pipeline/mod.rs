//! 流量采集流水线
//!
//! 流量源 -> 入队队列 -> 处理任务 -> 关联表（临时）+ 记录存储

pub mod correlation;
pub mod queue;
pub mod store;
pub mod worker;

pub use correlation::CorrelationTable;
pub use queue::{IngestQueue, IngestReceiver, ingest_queue};
pub use store::{RecordStore, Snapshot};
pub use worker::IngestWorker;
