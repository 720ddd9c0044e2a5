//! 流量事件入队队列
//!
//! 生产端在调用方线程上执行，入队永不阻塞；队列无界，
//! 持续过载时内存增长是接受的代价

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::event::{Direction, HttpMessage, ToolId, TrafficEvent};

/// 生产端（可克隆，可从任意线程同步调用）
#[derive(Clone)]
pub struct IngestQueue {
    sender: mpsc::UnboundedSender<TrafficEvent>,
    seq: Arc<AtomicU64>,
}

/// 消费端，仅由 worker 持有
pub struct IngestReceiver {
    receiver: mpsc::UnboundedReceiver<TrafficEvent>,
}

/// 创建一对队列端点
pub fn ingest_queue() -> (IngestQueue, IngestReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        IngestQueue {
            sender,
            seq: Arc::new(AtomicU64::new(0)),
        },
        IngestReceiver { receiver },
    )
}

impl IngestQueue {
    /// 非阻塞入队
    ///
    /// 仅当消费端已关闭时失败，此时记录日志并丢弃事件
    pub fn enqueue(&self, tool: ToolId, direction: Direction, message: Arc<dyn HttpMessage>) {
        let event = TrafficEvent {
            direction,
            tool,
            message,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        if let Err(e) = self.sender.send(event) {
            tracing::warn!(seq = e.0.seq, "流量队列已关闭，丢弃事件");
        }
    }
}

impl IngestReceiver {
    /// 取出下一个事件；取消信号到达或所有生产端关闭时返回 None
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<TrafficEvent> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            event = self.receiver.recv() => event,
        }
    }

    /// 取出当前已入队的事件，不等待
    pub fn try_next(&mut self) -> Option<TrafficEvent> {
        self.receiver.try_recv().ok()
    }

    /// 关闭队列，之后的入队会被丢弃，已入队事件仍可取出
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
