//! CSV 文件格式
//!
//! 头部注释块 + 列头 + 数据行 + 尾部注释块。格式没有引号转义，
//! 字段中的逗号和换行在输出前被替换

use std::io::{self, Write};
use std::sync::Arc;

use chrono::{DateTime, Local};

use super::SYSTEM_NAME;
use crate::common::{RunId, format_timestamp};
use crate::model::record::{CSV_HEADER, LogRecord};

/// 写入文件头尾的元数据
#[derive(Debug, Clone)]
pub struct ExportMeta<'a> {
    pub run_id: &'a RunId,
    pub host_version: &'a str,
    pub exported_at: DateTime<Local>,
}

pub fn write_csv<W: Write>(
    writer: &mut W,
    meta: &ExportMeta<'_>,
    records: &[Arc<LogRecord>],
) -> io::Result<()> {
    let exported_at = format_timestamp(&meta.exported_at);

    writeln!(writer, "# Generated By: {}", SYSTEM_NAME)?;
    writeln!(writer, "# Session ID: {}", meta.run_id)?;
    writeln!(writer, "# Export Time: {}", exported_at)?;
    writeln!(writer, "# Total Requests: {}", records.len())?;
    writeln!(writer)?;

    writeln!(writer, "{}", CSV_HEADER)?;
    for record in records {
        writeln!(writer, "{}", record.to_csv_row())?;
    }

    writeln!(writer)?;
    writeln!(writer, "# --- FOOTER METADATA ---")?;
    writeln!(writer, "# Host Version: {}", meta.host_version)?;
    writeln!(writer, "# Exported: {}", exported_at)?;
    writeln!(writer, "# Runtime ID: {}", meta.run_id)?;
    writeln!(writer, "# Total Requests Logged: {}", records.len())?;
    Ok(())
}
