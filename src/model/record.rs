//! 日志记录数据模型

use chrono::{DateTime, Local};

use super::event::ResponseStatus;
use crate::common::{format_timestamp, sanitize_field};

/// 导出文件列头
pub const CSV_HEADER: &str = "Serial No,Host,Request Method,URL,Status Code,Tool Name,Request Count,Insertion Point Count,Start Time,End Time";

/// 等待响应的请求（关联表条目）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub start_time: DateTime<Local>,
    pub insertion_points: u32,
    pub url: String,
}

/// 已完成的日志记录，追加后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub serial: u64,
    pub host: String,
    pub method: String,
    pub url: String,
    pub status: ResponseStatus,
    pub tool_name: String,
    /// 包含本条在内，相同 URL 的累计次数
    pub request_count: u64,
    pub insertion_points: u32,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
}

impl LogRecord {
    /// 按列头顺序输出已清理的字段
    pub fn csv_fields(&self) -> [String; 10] {
        [
            self.serial.to_string(),
            sanitize_field(&self.host),
            sanitize_field(&self.method),
            sanitize_field(&self.url),
            self.status.to_string(),
            sanitize_field(&self.tool_name),
            self.request_count.to_string(),
            self.insertion_points.to_string(),
            format_timestamp(&self.start_time),
            format_timestamp(&self.end_time),
        ]
    }

    /// 输出一行 CSV（不含换行）
    pub fn to_csv_row(&self) -> String {
        self.csv_fields().join(",")
    }
}
