//! 线程安全的只追加日志存储
//!
//! 存储同时持有请求/序号共用的计数器，所有操作由同一把锁互斥

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::correlation::CorrelationTable;
use crate::model::record::{LogRecord, PendingRequest};

/// 存储在某一时刻的不可变副本
pub type Snapshot = Vec<Arc<LogRecord>>;

/// 序号不连续时的追加错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialOutOfOrder {
    pub expected: u64,
    pub actual: u64,
}

impl std::fmt::Display for SerialOutOfOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected serial {}, got {}", self.expected, self.actual)
    }
}

impl std::error::Error for SerialOutOfOrder {}

/// 生成记录时可用的上下文
#[derive(Debug)]
pub struct FinalizeContext {
    /// 新分配的序号
    pub serial: u64,
    /// 以该序号登记的在途请求（如果有）
    pub pending: Option<PendingRequest>,
    /// 包含本条在内的相同 URL 次数
    pub request_count: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    records: Vec<Arc<LogRecord>>,
    /// URL -> 已完成次数，替代每次全量扫描
    url_counts: HashMap<String, u64>,
    /// 最后分配的序号
    counter: u64,
}

impl Ledger {
    fn append(&mut self, record: LogRecord) -> Result<Arc<LogRecord>, SerialOutOfOrder> {
        let expected = self.counter + 1;
        if record.serial != expected {
            return Err(SerialOutOfOrder {
                expected,
                actual: record.serial,
            });
        }
        self.counter = record.serial;
        *self.url_counts.entry(record.url.clone()).or_insert(0) += 1;
        let record = Arc::new(record);
        self.records.push(record.clone());
        Ok(record)
    }
}

#[derive(Debug, Default)]
pub struct RecordStore {
    inner: Mutex<Ledger>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求登记使用的 ID：下一个将被分配的序号（不递增计数器）
    pub fn next_request_id(&self) -> u64 {
        self.inner.lock().counter + 1
    }

    /// 追加一条已带序号的记录，序号必须紧接当前计数器
    ///
    /// 供自行分配序号的调用方使用；处理任务走 `finalize`，两者共用同一检查
    pub fn append(&self, record: LogRecord) -> Result<Arc<LogRecord>, SerialOutOfOrder> {
        self.inner.lock().append(record)
    }

    /// 完成一条响应：分配序号、取出关联请求、计算 URL 次数并追加
    ///
    /// 整个过程在存储锁内完成（内部再获取关联表锁），
    /// 与 `clear` 的加锁顺序一致
    pub fn finalize<F>(
        &self,
        table: &CorrelationTable,
        url: &str,
        build: F,
    ) -> Result<Arc<LogRecord>, SerialOutOfOrder>
    where
        F: FnOnce(FinalizeContext) -> LogRecord,
    {
        let mut ledger = self.inner.lock();
        let serial = ledger.counter + 1;
        let pending = table.take(serial);
        let request_count = ledger.url_counts.get(url).copied().unwrap_or(0) + 1;

        let mut record = build(FinalizeContext {
            serial,
            pending,
            request_count,
        });
        // 序号和 URL 以存储分配的为准
        record.serial = serial;
        record.url = url.to_string();
        record.request_count = request_count;

        ledger.append(record)
    }

    /// 获取当前所有记录的快照
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().records.clone()
    }

    /// 清空存储和关联表，并将计数器归零，返回清除的记录数
    pub fn clear(&self, table: &CorrelationTable) -> usize {
        let mut ledger = self.inner.lock();
        let cleared = ledger.records.len();
        let pending = table.clear();
        *ledger = Ledger::default();
        tracing::debug!(cleared, pending, "记录存储已清空");
        cleared
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
