//! 流量事件与外部消息句柄

use std::sync::Arc;

use bytes::Bytes;

/// 产生流量的工具标识（由流量源定义，对本系统不透明）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToolId(pub u32);

/// 事件方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// 参数来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Url,
    Body,
    Cookie,
}

/// 请求中可识别的一个参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub kind: ParameterKind,
    pub name: String,
    pub value: String,
}

/// 响应状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Code(u16),
    /// 没有响应或响应为空
    Missing,
    /// 有响应但状态行无法解析
    Unparseable,
}

impl ResponseStatus {
    /// 从原始响应字节解析状态码
    pub fn from_response(response: Option<&[u8]>) -> Self {
        match response {
            None => Self::Missing,
            Some(bytes) if bytes.is_empty() => Self::Missing,
            Some(bytes) => parse_status_line(bytes)
                .map(Self::Code)
                .unwrap_or(Self::Unparseable),
        }
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseStatus::Code(code) => write!(f, "{}", code),
            ResponseStatus::Missing => f.write_str("-"),
            ResponseStatus::Unparseable => f.write_str("Error"),
        }
    }
}

/// 解析 `HTTP/1.1 200 OK` 形式的状态行
fn parse_status_line(bytes: &[u8]) -> Option<u16> {
    let line_end = bytes
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(bytes.len());
    let line = std::str::from_utf8(&bytes[..line_end]).ok()?.trim_end();

    let mut parts = line.splitn(3, ' ');
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let code = parts.next()?;
    http::StatusCode::from_bytes(code.as_bytes())
        .ok()
        .map(|status| status.as_u16())
}

/// 流量源持有的消息句柄（只读）
///
/// 访问器可能失败，错误由 worker 在单事件边界处记录
pub trait HttpMessage: Send + Sync {
    /// 请求方法
    fn method(&self) -> anyhow::Result<String>;

    /// 完整请求 URL
    fn url(&self) -> anyhow::Result<String>;

    /// 请求中可识别的参数列表
    fn parameters(&self) -> anyhow::Result<Vec<Parameter>>;

    /// 目标主机
    fn host(&self) -> String;

    /// 原始响应字节，请求阶段为 None
    fn response(&self) -> Option<Bytes>;

    /// 响应状态码
    fn status(&self) -> ResponseStatus {
        ResponseStatus::from_response(self.response().as_deref())
    }
}

/// 流量源提供的环境信息
pub trait TrafficSource: Send + Sync {
    /// 工具显示名称
    fn tool_name(&self, tool: ToolId) -> String;

    /// 宿主环境版本，写入导出文件尾部
    fn host_version(&self) -> String;
}

/// 一次观察到的请求或响应，由 worker 恰好消费一次
#[derive(Clone)]
pub struct TrafficEvent {
    pub direction: Direction,
    pub tool: ToolId,
    pub message: Arc<dyn HttpMessage>,
    /// 入队顺序
    pub seq: u64,
}

impl std::fmt::Debug for TrafficEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficEvent")
            .field("direction", &self.direction)
            .field("tool", &self.tool)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_response() {
        assert_eq!(
            ResponseStatus::from_response(Some(b"HTTP/1.1 404 Not Found\r\n\r\n")),
            ResponseStatus::Code(404)
        );
        assert_eq!(
            ResponseStatus::from_response(Some(b"HTTP/2 204\r\n")),
            ResponseStatus::Code(204)
        );
        assert_eq!(ResponseStatus::from_response(None), ResponseStatus::Missing);
        assert_eq!(ResponseStatus::from_response(Some(b"")), ResponseStatus::Missing);
        assert_eq!(
            ResponseStatus::from_response(Some(b"garbage")),
            ResponseStatus::Unparseable
        );
        assert_eq!(
            ResponseStatus::from_response(Some(b"HTTP/1.1 abc OK\r\n")),
            ResponseStatus::Unparseable
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ResponseStatus::Code(200).to_string(), "200");
        assert_eq!(ResponseStatus::Missing.to_string(), "-");
        assert_eq!(ResponseStatus::Unparseable.to_string(), "Error");
    }
}
