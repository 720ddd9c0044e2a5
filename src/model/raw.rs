//! 基于原始 HTTP/1.x 字节的消息句柄
//!
//! 供重放命令和测试使用；解析失败不会在构造时报错，
//! 而是推迟到访问器上，由 worker 按单事件错误处理

use anyhow::Context;
use bytes::Bytes;
use url::{Url, form_urlencoded};

use super::event::{HttpMessage, Parameter, ParameterKind, ToolId, TrafficSource};

/// 解析后的请求头部
#[derive(Debug, Clone)]
struct RequestHead {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 原始请求/响应字节构成的消息
#[derive(Debug, Clone)]
pub struct RawHttpMessage {
    head: Result<RequestHead, String>,
    secure: bool,
    response: Option<Bytes>,
}

impl RawHttpMessage {
    pub fn new(request: impl Into<Bytes>, response: Option<Bytes>, secure: bool) -> Self {
        Self {
            head: parse_request(request.into()),
            secure,
            response,
        }
    }

    /// 附加响应（用于同一请求的响应事件）
    pub fn with_response(mut self, response: impl Into<Bytes>) -> Self {
        self.response = Some(response.into());
        self
    }

    fn head(&self) -> anyhow::Result<&RequestHead> {
        self.head
            .as_ref()
            .map_err(|e| anyhow::anyhow!("请求解析失败: {}", e))
    }

    /// 完整请求 URL：绝对形式的请求目标直接解析，否则由 Host 头和协议拼出
    ///
    /// 缺少主机或端口无效时返回错误，默认端口会被省略
    fn request_url(&self) -> anyhow::Result<Url> {
        let head = self.head()?;
        let url = if head.target.starts_with("http://") || head.target.starts_with("https://") {
            Url::parse(&head.target)
                .with_context(|| format!("无效的请求目标: {}", head.target))?
        } else {
            if !head.target.starts_with('/') {
                anyhow::bail!("无效的请求目标: {}", head.target);
            }
            let host = head.header("Host").unwrap_or_default();
            if host.is_empty() {
                anyhow::bail!("缺少 Host 头");
            }
            if host.ends_with(':') {
                anyhow::bail!("Host 头端口为空: {}", host);
            }
            let scheme = if self.secure { "https" } else { "http" };
            let origin = Url::parse(&format!("{}://{}", scheme, host))
                .with_context(|| format!("无效的 Host 头: {}", host))?;
            if origin.path() != "/" || origin.query().is_some() || !origin.username().is_empty() {
                anyhow::bail!("无效的 Host 头: {}", host);
            }
            origin
                .join(&head.target)
                .with_context(|| format!("无效的请求目标: {}", head.target))?
        };

        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(url),
            _ => anyhow::bail!("请求 URL 缺少主机: {}", url),
        }
    }
}

impl HttpMessage for RawHttpMessage {
    fn method(&self) -> anyhow::Result<String> {
        Ok(self.head()?.method.clone())
    }

    fn url(&self) -> anyhow::Result<String> {
        Ok(self.request_url()?.to_string())
    }

    fn parameters(&self) -> anyhow::Result<Vec<Parameter>> {
        let head = self.head()?;
        let mut params: Vec<Parameter> = self
            .request_url()?
            .query_pairs()
            .map(|(name, value)| Parameter {
                kind: ParameterKind::Url,
                name: name.into_owned(),
                value: value.into_owned(),
            })
            .collect();

        if let Some(cookie) = head.header("Cookie") {
            for pair in cookie.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                params.push(Parameter {
                    kind: ParameterKind::Cookie,
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
        }

        let is_form = head
            .header("Content-Type")
            .map(|ct| ct.to_ascii_lowercase().contains("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if is_form {
            params.extend(form_urlencoded::parse(&head.body).map(|(name, value)| Parameter {
                kind: ParameterKind::Body,
                name: name.into_owned(),
                value: value.into_owned(),
            }));
        }

        Ok(params)
    }

    fn host(&self) -> String {
        self.request_url()
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    fn response(&self) -> Option<Bytes> {
        self.response.clone()
    }
}

fn parse_request(raw: Bytes) -> Result<RequestHead, String> {
    let (head_len, sep_len) = find_head_end(&raw).ok_or("缺少头部结束标记")?;
    let head_text = std::str::from_utf8(&raw[..head_len]).map_err(|e| e.to_string())?;
    let body = raw.slice(head_len + sep_len..);

    let mut lines = head_text.lines();
    let request_line = lines.next().ok_or("请求行为空")?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or("缺少请求方法")?.to_string();
    let target = parts.next().ok_or("缺少请求目标")?.to_string();
    let version = parts.next().ok_or("缺少协议版本")?;
    if !version.starts_with("HTTP/") {
        return Err(format!("无效的协议版本: {}", version));
    }

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    Ok(RequestHead {
        method,
        target,
        headers,
        body,
    })
}

/// 返回 (头部长度, 分隔符长度)
fn find_head_end(raw: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, 4));
    }
    raw.windows(2).position(|w| w == b"\n\n").map(|pos| (pos, 2))
}

/// 内置工具名称表
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    host_version: String,
}

impl ToolCatalog {
    const NAMES: &'static [(u32, &'static str)] = &[
        (1, "Suite"),
        (2, "Target"),
        (4, "Proxy"),
        (8, "Spider"),
        (16, "Scanner"),
        (32, "Intruder"),
        (64, "Repeater"),
        (128, "Sequencer"),
        (256, "Decoder"),
        (512, "Comparer"),
        (1024, "Extender"),
    ];

    pub fn new(host_version: impl Into<String>) -> Self {
        Self {
            host_version: host_version.into(),
        }
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new(concat!("traffic-saver ", env!("CARGO_PKG_VERSION")))
    }
}

impl TrafficSource for ToolCatalog {
    fn tool_name(&self, tool: ToolId) -> String {
        Self::NAMES
            .iter()
            .find(|(id, _)| *id == tool.0)
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| format!("Tool-{}", tool.0))
    }

    fn host_version(&self) -> String {
        self.host_version.clone()
    }
}
