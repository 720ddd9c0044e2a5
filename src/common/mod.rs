//! 公共工具模块

use chrono::{DateTime, Local};

/// 记录中的时间格式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 导出文件中的字段不支持引号转义，只能替换掉分隔符和换行
///
/// `,` 替换为 `;`，`\n` / `\r` 替换为空格
pub fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ',' => ';',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

/// 格式化记录时间
pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// 进程级运行标识，每次启动生成一次，标记本次运行产生的所有文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self(Local::now().format("%Y%m%d%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_field() {
        assert_eq!(sanitize_field("a,b"), "a;b");
        assert_eq!(sanitize_field("line1\r\nline2"), "line1  line2");
        assert_eq!(sanitize_field("https://a/x?q=1"), "https://a/x?q=1");
    }

    #[test]
    fn test_run_id_format() {
        let id = RunId::generate();
        assert_eq!(id.as_str().len(), 14);
        assert!(id.as_str().chars().all(|c| c.is_ascii_digit()));
    }
}
