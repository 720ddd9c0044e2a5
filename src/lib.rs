//! 流量日志采集
//!
//! 接收拦截到的请求/响应事件，关联成结构化记录，并按需或定时导出为 CSV

pub mod common;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod service;

pub use model::config::Config;
pub use model::event::{Direction, HttpMessage, ToolId, TrafficEvent, TrafficSource};
pub use model::record::LogRecord;
pub use service::TrafficLogger;
