//! 请求关联表：请求 ID -> 在途请求元数据

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::model::record::PendingRequest;

/// 线程安全的关联表，只暴露插入 / 取出 / 清空
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<u64, PendingRequest>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记请求，同一 ID 只保留最后一次登记
    pub fn insert(&self, id: u64, pending: PendingRequest) {
        if let Some(previous) = self.entries.lock().insert(id, pending) {
            tracing::debug!(id, url = %previous.url, "关联条目被覆盖");
        }
    }

    /// 取出并删除条目
    pub fn take(&self, id: u64) -> Option<PendingRequest> {
        self.entries.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清空所有条目，返回清除数量
    ///
    /// 由记录存储在持有自身锁时调用，保证加锁顺序固定为 存储 -> 关联表
    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn pending(url: &str, points: u32) -> PendingRequest {
        PendingRequest {
            start_time: Local::now(),
            insertion_points: points,
            url: url.to_string(),
        }
    }

    #[test]
    fn test_take_removes_entry() {
        let table = CorrelationTable::new();
        table.insert(1, pending("https://a/x", 2));

        let entry = table.take(1).unwrap();
        assert_eq!(entry.insertion_points, 2);
        assert!(table.take(1).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_insert_same_id_keeps_latest() {
        let table = CorrelationTable::new();
        table.insert(1, pending("https://a/x", 1));
        table.insert(1, pending("https://a/y", 3));

        assert_eq!(table.len(), 1);
        assert_eq!(table.take(1).unwrap().url, "https://a/y");
    }

    #[test]
    fn test_clear() {
        let table = CorrelationTable::new();
        table.insert(1, pending("https://a/x", 0));
        table.insert(2, pending("https://a/y", 0));

        assert_eq!(table.clear(), 2);
        assert_eq!(table.clear(), 0);
        assert!(table.is_empty());
    }
}
