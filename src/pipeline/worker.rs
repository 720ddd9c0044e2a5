//! 后台处理任务：消费队列中的流量事件，生成日志记录

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::correlation::CorrelationTable;
use super::queue::IngestReceiver;
use super::store::RecordStore;
use crate::model::event::{Direction, HttpMessage, TrafficEvent, TrafficSource};
use crate::model::record::{LogRecord, PendingRequest};

/// 单消费者处理器
#[derive(Clone)]
pub struct IngestWorker {
    store: Arc<RecordStore>,
    pending: Arc<CorrelationTable>,
    source: Arc<dyn TrafficSource>,
}

impl IngestWorker {
    pub fn new(
        store: Arc<RecordStore>,
        pending: Arc<CorrelationTable>,
        source: Arc<dyn TrafficSource>,
    ) -> Self {
        Self {
            store,
            pending,
            source,
        }
    }

    /// 启动后台任务，返回处理的事件数
    pub fn spawn(self, receiver: IngestReceiver, cancel: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(self.run(receiver, cancel))
    }

    async fn run(self, mut receiver: IngestReceiver, cancel: CancellationToken) -> u64 {
        tracing::info!("流量处理任务已启动");
        let mut processed = 0u64;

        while let Some(event) = receiver.next(&cancel).await {
            self.process_isolated(&event);
            processed += 1;
        }

        // 停止前处理已入队的事件
        receiver.close();
        let mut drained = 0u64;
        while let Some(event) = receiver.try_next() {
            self.process_isolated(&event);
            drained += 1;
        }

        tracing::info!(processed, drained, "流量处理任务已停止");
        processed + drained
    }

    /// 处理单个事件，错误和 panic 都只影响当前事件
    fn process_isolated(&self, event: &TrafficEvent) {
        match catch_unwind(AssertUnwindSafe(|| self.process(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(seq = event.seq, direction = ?event.direction, "处理流量事件失败: {:#}", e);
            }
            Err(_) => {
                tracing::error!(seq = event.seq, direction = ?event.direction, "处理流量事件时发生 panic");
            }
        }
    }

    /// 处理单个事件
    pub fn process(&self, event: &TrafficEvent) -> anyhow::Result<()> {
        match event.direction {
            Direction::Request => self.handle_request(event),
            Direction::Response => self.handle_response(event),
        }
    }

    fn handle_request(&self, event: &TrafficEvent) -> anyhow::Result<()> {
        let message = event.message.as_ref();
        let url = message.url().context("读取请求 URL 失败")?;
        let insertion_points = count_insertion_points(message);
        let start_time = Local::now();

        let id = self.store.next_request_id();
        tracing::debug!(id, url = %url, insertion_points, "登记请求");
        self.pending.insert(
            id,
            PendingRequest {
                start_time,
                insertion_points,
                url,
            },
        );
        Ok(())
    }

    fn handle_response(&self, event: &TrafficEvent) -> anyhow::Result<()> {
        let message = event.message.as_ref();
        let status = message.status();
        let url = message.url().context("读取请求 URL 失败")?;
        let method = message.method().context("读取请求方法失败")?;
        let host = message.host();
        let tool_name = self.source.tool_name(event.tool);
        let end_time = Local::now();

        let record = self
            .store
            .finalize(&self.pending, &url, |ctx| {
                // 关联失败时以响应到达时间作为开始时间
                let (start_time, insertion_points) = ctx
                    .pending
                    .map(|p| (p.start_time, p.insertion_points))
                    .unwrap_or((end_time, 0));
                LogRecord {
                    serial: ctx.serial,
                    host,
                    method,
                    url: url.clone(),
                    status,
                    tool_name,
                    request_count: ctx.request_count,
                    insertion_points,
                    start_time,
                    end_time,
                }
            })
            .context("追加日志记录失败")?;

        tracing::debug!(
            serial = record.serial,
            status = %record.status,
            request_count = record.request_count,
            "记录已完成"
        );
        Ok(())
    }
}

/// 注入点数量
///
/// 近似值：以请求中可识别的参数数量代替。部分工具在发送前会移除
/// 交互式标记，因此无法统计真实标记数
fn count_insertion_points(message: &dyn HttpMessage) -> u32 {
    match message.parameters() {
        Ok(params) => u32::try_from(params.len()).unwrap_or(u32::MAX),
        Err(e) => {
            tracing::debug!("读取请求参数失败，注入点计为 0: {:#}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::{Parameter, ParameterKind, ResponseStatus, ToolId};
    use crate::model::raw::ToolCatalog;
    use crate::pipeline::queue::ingest_queue;
    use bytes::Bytes;

    /// 测试用消息
    struct MockMessage {
        url: &'static str,
        params: usize,
        response: Option<&'static str>,
        broken: bool,
        panics: bool,
    }

    impl MockMessage {
        fn new(url: &'static str) -> Self {
            Self {
                url,
                params: 0,
                response: None,
                broken: false,
                panics: false,
            }
        }

        fn params(mut self, n: usize) -> Self {
            self.params = n;
            self
        }

        fn response(mut self, raw: &'static str) -> Self {
            self.response = Some(raw);
            self
        }
    }

    impl HttpMessage for MockMessage {
        fn method(&self) -> anyhow::Result<String> {
            Ok("GET".to_string())
        }

        fn url(&self) -> anyhow::Result<String> {
            if self.panics {
                panic!("消息句柄异常");
            }
            if self.broken {
                anyhow::bail!("无法解析请求");
            }
            Ok(self.url.to_string())
        }

        fn parameters(&self) -> anyhow::Result<Vec<Parameter>> {
            Ok((0..self.params)
                .map(|i| Parameter {
                    kind: ParameterKind::Url,
                    name: format!("p{}", i),
                    value: String::new(),
                })
                .collect())
        }

        fn host(&self) -> String {
            "a.example".to_string()
        }

        fn response(&self) -> Option<Bytes> {
            self.response.map(|s| Bytes::from_static(s.as_bytes()))
        }
    }

    fn worker() -> (IngestWorker, Arc<RecordStore>, Arc<CorrelationTable>) {
        let store = Arc::new(RecordStore::new());
        let pending = Arc::new(CorrelationTable::new());
        let worker = IngestWorker::new(
            store.clone(),
            pending.clone(),
            Arc::new(ToolCatalog::new("test")),
        );
        (worker, store, pending)
    }

    fn event(direction: Direction, message: MockMessage) -> TrafficEvent {
        TrafficEvent {
            direction,
            tool: ToolId(4),
            message: Arc::new(message),
            seq: 0,
        }
    }

    #[test]
    fn test_request_then_response_correlates() {
        let (worker, store, pending) = worker();

        worker
            .process(&event(Direction::Request, MockMessage::new("https://a/x").params(3)))
            .unwrap();
        assert_eq!(pending.len(), 1);

        worker
            .process(&event(
                Direction::Response,
                MockMessage::new("https://a/x").response("HTTP/1.1 200 OK\r\n\r\n"),
            ))
            .unwrap();

        let records = store.snapshot();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.serial, 1);
        assert_eq!(record.insertion_points, 3);
        assert_eq!(record.status, ResponseStatus::Code(200));
        assert_eq!(record.tool_name, "Proxy");
        assert_eq!(record.host, "a.example");
        assert!(record.start_time <= record.end_time);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_orphan_response_uses_response_time() {
        let (worker, store, _) = worker();

        worker
            .process(&event(Direction::Response, MockMessage::new("https://a/x")))
            .unwrap();

        let records = store.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].insertion_points, 0);
        assert_eq!(records[0].start_time, records[0].end_time);
        assert_eq!(records[0].status, ResponseStatus::Missing);
    }

    #[test]
    fn test_unparseable_response_gets_sentinel() {
        let (worker, store, _) = worker();

        worker
            .process(&event(
                Direction::Response,
                MockMessage::new("https://a/x").response("\u{1}\u{2}garbage"),
            ))
            .unwrap();

        assert_eq!(store.snapshot()[0].status, ResponseStatus::Unparseable);
    }

    #[test]
    fn test_broken_message_returns_error() {
        let (worker, store, _) = worker();
        let mut message = MockMessage::new("https://a/x");
        message.broken = true;

        assert!(worker.process(&event(Direction::Response, message)).is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_bad_event_does_not_stop_worker() {
        let (worker, store, _) = worker();
        let (queue, rx) = ingest_queue();
        let cancel = CancellationToken::new();
        let handle = worker.spawn(rx, cancel.clone());

        let mut broken = MockMessage::new("https://a/x");
        broken.broken = true;
        let mut panicking = MockMessage::new("https://a/x");
        panicking.panics = true;

        queue.enqueue(ToolId(4), Direction::Response, Arc::new(broken));
        queue.enqueue(ToolId(4), Direction::Response, Arc::new(panicking));
        queue.enqueue(ToolId(4), Direction::Response, Arc::new(MockMessage::new("https://a/y")));

        cancel.cancel();
        let processed = handle.await.unwrap();

        assert_eq!(processed, 3);
        let records = store.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "https://a/y");
    }
}
