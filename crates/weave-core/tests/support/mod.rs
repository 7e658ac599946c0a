//! 集成测试共享的内存传输与记录型 Handler。
//!
//! # 教案式说明
//! - **意图（Why）**：执行器的契约（单飞、FIFO、能力缺失路径）需要一个可以精确计数、可以注入延迟与
//!   读取脚本的传输；真实 TCP 会让这些断言变得不稳定。
//! - **逻辑（How）**：[`MockTransport`] 按 [`Capabilities`] 决定暴露哪些能力访问器，所有调用都计数；
//!   [`Recorder`] 把收到的事件以 `"标签:事件"` 的形式追加到共享日志后继续传播。

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use weave_core::{
    Channel, ChannelError, ChannelFuture, Handler, HandlerContext, Message, Params, Transport,
    transport::{
        AutoRead, UnsafeAccept, UnsafeBind, UnsafeClose, UnsafeConnect, UnsafeDisconnect,
        UnsafeRead, UnsafeWrite,
    },
};

/// 读取脚本中的一步。
pub enum ReadStep {
    Message(&'static str),
    Nothing,
    Skip,
    Fail(ChannelError),
}

/// 传输暴露的能力集合。
#[derive(Debug, Default, Clone, Copy)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
    pub bind: bool,
    pub close: bool,
    pub connect: bool,
    pub disconnect: bool,
    pub accept: bool,
    pub auto_read: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            read: true,
            write: true,
            bind: true,
            close: true,
            connect: true,
            disconnect: true,
            accept: true,
            auto_read: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

pub struct MockTransport {
    caps: Capabilities,
    op_delay: Duration,
    write_delay: Duration,
    bind_error: Option<ChannelError>,
    reads: Mutex<VecDeque<ReadStep>>,
    backlog: AtomicUsize,
    pub binds: AtomicUsize,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub read_calls: AtomicUsize,
    pub post_active_calls: AtomicUsize,
    pub written: Mutex<Vec<String>>,
    pub accepted: Mutex<Vec<ChannelFuture>>,
}

impl MockTransport {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            op_delay: Duration::ZERO,
            write_delay: Duration::ZERO,
            bind_error: None,
            reads: Mutex::new(VecDeque::new()),
            backlog: AtomicUsize::new(0),
            binds: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            post_active_calls: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// bind/connect/close/disconnect 的人工延迟。
    pub fn with_op_delay(mut self, delay: Duration) -> Self {
        self.op_delay = delay;
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn failing_bind(mut self, error: ChannelError) -> Self {
        self.bind_error = Some(error);
        self
    }

    /// 读取脚本；脚本耗尽后返回 `Eof`。
    pub fn with_reads(self, steps: Vec<ReadStep>) -> Self {
        self.reads.lock().extend(steps);
        self
    }

    /// 接受循环可以产出的子通道数量；耗尽后阻塞到父通道失活。
    pub fn with_backlog(self, backlog: usize) -> Self {
        self.backlog.store(backlog, Ordering::SeqCst);
        self
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    async fn pause(&self) {
        if !self.op_delay.is_zero() {
            tokio::time::sleep(self.op_delay).await;
        }
    }
}

#[async_trait]
impl UnsafeRead for MockTransport {
    async fn unsafe_read(&self) -> Result<Option<Message>, ChannelError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.reads.lock().pop_front();
        match step {
            Some(ReadStep::Message(text)) => Ok(Some(Box::new(text.to_owned()))),
            Some(ReadStep::Nothing) => Ok(None),
            Some(ReadStep::Skip) => Err(ChannelError::Skip),
            Some(ReadStep::Fail(error)) => Err(error),
            None => Err(ChannelError::Eof),
        }
    }
}

#[async_trait]
impl UnsafeWrite for MockTransport {
    async fn unsafe_write(&self, message: Message) -> Result<(), ChannelError> {
        let text = match message.downcast::<String>() {
            Ok(text) => *text,
            Err(message) => match message.downcast::<&'static str>() {
                Ok(text) => (*text).to_owned(),
                Err(_) => return Err(ChannelError::UnknownObjectType("mock")),
            },
        };
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        self.written.lock().push(text);
        Ok(())
    }
}

#[async_trait]
impl UnsafeBind for MockTransport {
    async fn unsafe_bind(&self, _addr: SocketAddr) -> Result<(), ChannelError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        match &self.bind_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl UnsafeConnect for MockTransport {
    async fn unsafe_connect(
        &self,
        _local: Option<SocketAddr>,
        _remote: SocketAddr,
    ) -> Result<(), ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(())
    }
}

#[async_trait]
impl UnsafeClose for MockTransport {
    async fn unsafe_close(&self) -> Result<(), ChannelError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(())
    }
}

#[async_trait]
impl UnsafeDisconnect for MockTransport {
    async fn unsafe_disconnect(&self) -> Result<(), ChannelError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(())
    }
}

#[async_trait]
impl UnsafeAccept for MockTransport {
    async fn unsafe_accept(&self, parent: &Arc<Channel>) -> (Option<Arc<Channel>>, ChannelFuture) {
        let claimed = self
            .backlog
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if claimed {
            let child = Channel::accept_child(
                parent,
                Arc::new(MockTransport::new(Capabilities {
                    write: true,
                    ..Capabilities::none()
                })),
            );
            let accepted = ChannelFuture::new(Some(&child));
            self.accepted.lock().push(accepted.clone());
            return (Some(child), accepted);
        }
        while parent.is_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        (None, ChannelFuture::detached())
    }
}

impl AutoRead for MockTransport {
    fn is_auto_read(&self) -> bool {
        self.caps.auto_read
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn reader(&self) -> Option<&dyn UnsafeRead> {
        self.caps.read.then_some(self as &dyn UnsafeRead)
    }

    fn writer(&self) -> Option<&dyn UnsafeWrite> {
        self.caps.write.then_some(self as &dyn UnsafeWrite)
    }

    fn binder(&self) -> Option<&dyn UnsafeBind> {
        self.caps.bind.then_some(self as &dyn UnsafeBind)
    }

    fn closer(&self) -> Option<&dyn UnsafeClose> {
        self.caps.close.then_some(self as &dyn UnsafeClose)
    }

    fn connector(&self) -> Option<&dyn UnsafeConnect> {
        self.caps.connect.then_some(self as &dyn UnsafeConnect)
    }

    fn disconnector(&self) -> Option<&dyn UnsafeDisconnect> {
        self.caps.disconnect.then_some(self as &dyn UnsafeDisconnect)
    }

    fn acceptor(&self) -> Option<&dyn UnsafeAccept> {
        self.caps.accept.then_some(self as &dyn UnsafeAccept)
    }

    fn auto_read(&self) -> Option<&dyn AutoRead> {
        Some(self as &dyn AutoRead)
    }

    fn post_active(&self, _channel: &Arc<Channel>) {
        self.post_active_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// 共享事件日志。
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// 记录事件后继续传播的 Handler。
pub struct Recorder {
    label: &'static str,
    log: EventLog,
}

impl Recorder {
    pub fn new(label: &'static str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            label,
            log: Arc::clone(log),
        })
    }

    fn record(&self, event: impl AsRef<str>) {
        self.log
            .lock()
            .push(format!("{}:{}", self.label, event.as_ref()));
    }
}

impl Handler for Recorder {
    fn registered(&self, ctx: &HandlerContext) {
        self.record("registered");
        ctx.fire_registered();
    }

    fn unregistered(&self, ctx: &HandlerContext) {
        self.record("unregistered");
        ctx.fire_unregistered();
    }

    fn active(&self, ctx: &HandlerContext) {
        self.record("active");
        ctx.fire_active();
    }

    fn inactive(&self, ctx: &HandlerContext) {
        self.record("inactive");
        ctx.fire_inactive();
    }

    fn read(&self, ctx: &HandlerContext, message: Message) {
        match message.downcast_ref::<String>() {
            Some(text) => self.record(format!("read:{text}")),
            None => self.record("read:?"),
        }
        ctx.fire_read(message);
    }

    fn read_completed(&self, ctx: &HandlerContext) {
        self.record("read_completed");
        ctx.fire_read_completed();
    }

    fn write(&self, ctx: &HandlerContext, message: Message, future: ChannelFuture) {
        self.record("write");
        ctx.write(message, future);
    }

    fn close(&self, ctx: &HandlerContext, future: ChannelFuture) {
        self.record("close");
        ctx.close(future);
    }

    fn error_caught(&self, ctx: &HandlerContext, error: ChannelError) {
        self.record(format!("error:{error}"));
        ctx.fire_error_caught(error);
    }
}

/// 读消息的终点：消费 `String` 消息，避免 tail 报告未处理读。
pub struct Sink {
    log: EventLog,
}

impl Sink {
    pub fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::clone(log),
        })
    }
}

impl Handler for Sink {
    fn read(&self, _ctx: &HandlerContext, message: Message) {
        if let Ok(text) = message.downcast::<String>() {
            self.log.lock().push(format!("sink:{text}"));
        }
    }

    fn read_completed(&self, _ctx: &HandlerContext) {
        self.log.lock().push("sink:read_completed".to_owned());
    }
}

/// 用当前运行时构造客户端通道。
pub fn client_channel(transport: Arc<MockTransport>) -> Arc<Channel> {
    Channel::client(transport, Params::new(), Handle::current())
}

/// 轮询直到条件成立，最多等待两秒。
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn snapshot(log: &EventLog) -> Vec<String> {
    log.lock().clone()
}
