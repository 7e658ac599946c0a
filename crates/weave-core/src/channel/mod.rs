//! 通道门面。
//!
//! # 教案式说明
//! - **意图（Why）**：通道把标识、参数、流水线、执行器与关闭 Future 组合成一个对象，应用只和它打交道。
//! - **逻辑（How）**：
//!   - 通道总是以 `Arc<Channel>` 存在，通过 `Arc::new_cyclic` 一次性构造，Pipeline 与执行器在构造时
//!     拿到指向通道的弱引用，不存在“先创建再注入”的半初始化状态；
//!   - 门面方法全部委托给 [`Pipeline`]；
//!   - [`ChannelKind`] 区分客户端、服务端与被接受的子通道，承载各自特有的状态。
//! - **契约（What）**：
//!   - `id()` 首次访问时生成，之后不可变；`serial()` 在进程内唯一且单调递增；
//!   - `inactive` 事件每次激活至多广播一次；`release()` 至多执行一次；
//!   - 服务端通道持有处于活跃状态的子通道，子通道失活后即从父通道中摘除。

mod id;
mod unsafe_io;

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::debug;

use crate::{
    Message,
    future::ChannelFuture,
    params::Params,
    pipeline::{Handler, Pipeline},
    transport::Transport,
};

pub use unsafe_io::ChannelUnsafe;

/// 通道角色及其特有状态。
pub enum ChannelKind {
    /// 主动连接的客户端通道。
    Client,
    /// 监听并接受子连接的服务端通道。
    Server {
        /// 装到每个子通道上的 Handler。
        child_handler: Option<Arc<dyn Handler>>,
        /// 复制到每个子通道上的参数。
        child_params: Params,
    },
    /// 由服务端通道接受的子通道。
    Accepted,
}

impl fmt::Debug for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Client => f.write_str("Client"),
            ChannelKind::Server { child_params, .. } => f
                .debug_struct("Server")
                .field("child_params", child_params)
                .finish_non_exhaustive(),
            ChannelKind::Accepted => f.write_str("Accepted"),
        }
    }
}

/// 通道。
pub struct Channel {
    id: OnceLock<String>,
    serial: u64,
    params: Params,
    pipeline: Arc<Pipeline>,
    unsafe_io: ChannelUnsafe,
    close_future: ChannelFuture,
    disconnect_future: Option<ChannelFuture>,
    active: AtomicBool,
    released: AtomicBool,
    parent: Option<Weak<Channel>>,
    children: DashMap<u64, Arc<Channel>>,
    kind: ChannelKind,
    transport: Arc<dyn Transport>,
    runtime: Handle,
}

impl Channel {
    /// 构造一个完整装配的通道。
    ///
    /// `runtime` 用于派生执行器的后台任务。
    pub fn new(
        transport: Arc<dyn Transport>,
        kind: ChannelKind,
        params: Params,
        runtime: Handle,
    ) -> Arc<Self> {
        Self::build(transport, kind, params, runtime, None)
    }

    /// 构造客户端通道。
    pub fn client(transport: Arc<dyn Transport>, params: Params, runtime: Handle) -> Arc<Self> {
        Self::new(transport, ChannelKind::Client, params, runtime)
    }

    /// 构造服务端通道。
    pub fn server(
        transport: Arc<dyn Transport>,
        params: Params,
        child_handler: Option<Arc<dyn Handler>>,
        child_params: Params,
        runtime: Handle,
    ) -> Arc<Self> {
        let kind = ChannelKind::Server {
            child_handler,
            child_params,
        };
        Self::new(transport, kind, params, runtime)
    }

    /// 为服务端通道构造一个被接受的子通道：继承子参数、运行时，并装上子 Handler。
    ///
    /// 供 [`UnsafeAccept`](crate::transport::UnsafeAccept) 的实现调用；父通道不是服务端时
    /// 只继承运行时。
    pub fn accept_child(parent: &Arc<Channel>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let params = parent.child_params().cloned().unwrap_or_default();
        let child = Self::build(
            transport,
            ChannelKind::Accepted,
            params,
            parent.runtime.clone(),
            Some(Arc::downgrade(parent)),
        );
        if let Some(handler) = parent.child_handler() {
            child.pipeline.add_last("handler", handler);
        }
        child
    }

    fn build(
        transport: Arc<dyn Transport>,
        kind: ChannelKind,
        params: Params,
        runtime: Handle,
        parent: Option<Weak<Channel>>,
    ) -> Arc<Self> {
        let is_client = matches!(kind, ChannelKind::Client);
        Arc::new_cyclic(|this: &Weak<Channel>| Channel {
            id: OnceLock::new(),
            serial: id::next_serial(),
            params,
            pipeline: Pipeline::new(this.clone()),
            unsafe_io: ChannelUnsafe::new(this.clone()),
            close_future: ChannelFuture::affiliated(this.clone()),
            disconnect_future: is_client.then(|| ChannelFuture::affiliated(this.clone())),
            active: AtomicBool::new(false),
            released: AtomicBool::new(false),
            parent,
            children: DashMap::new(),
            kind,
            transport,
            runtime,
        })
    }

    /// 全局唯一标识，首次访问时生成。
    pub fn id(&self) -> &str {
        self.id.get_or_init(id::generate_id)
    }

    /// 进程内唯一的序号。
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// 通道参数。
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// 流水线。
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// 执行器。通常只由 head 哨兵调用。
    pub fn unsafe_io(&self) -> &ChannelUnsafe {
        &self.unsafe_io
    }

    /// 底层传输。
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// 通道关闭完成时完成的 Future。
    pub fn close_future(&self) -> &ChannelFuture {
        &self.close_future
    }

    /// 客户端通道断开完成时完成的 Future；其它角色返回 `None`。
    pub fn disconnect_future(&self) -> Option<&ChannelFuture> {
        self.disconnect_future.as_ref()
    }

    /// 通道角色。
    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    /// 父通道（仅被接受的子通道）。
    pub fn parent(&self) -> Option<Arc<Channel>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// 当前活跃的子通道。
    pub fn children(&self) -> Vec<Arc<Channel>> {
        self.children
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 当前活跃的子通道数量。
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn adopt_child(&self, child: &Arc<Channel>) {
        self.children.insert(child.serial, Arc::clone(child));
    }

    /// 服务端通道的子参数。
    pub fn child_params(&self) -> Option<&Params> {
        match &self.kind {
            ChannelKind::Server { child_params, .. } => Some(child_params),
            _ => None,
        }
    }

    /// 服务端通道的子 Handler。
    pub fn child_handler(&self) -> Option<Arc<dyn Handler>> {
        match &self.kind {
            ChannelKind::Server { child_handler, .. } => child_handler.clone(),
            _ => None,
        }
    }

    /// 执行器任务所在的运行时。
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// 是否活跃。
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 传输是否声明自动读取；没有该能力时视为否。
    pub fn is_auto_read(&self) -> bool {
        self.transport
            .auto_read()
            .is_some_and(|auto_read| auto_read.is_auto_read())
    }

    /// 是否已经释放。
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// 标记活跃：执行传输的激活钩子，广播 `active`，并在自动读取时开始读。
    ///
    /// 已经活跃时为空操作。
    pub fn active_channel(self: &Arc<Self>) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(channel = self.id(), serial = self.serial, "channel active");
        self.transport.post_active(self);
        self.pipeline.fire_active();
        if self.is_auto_read() {
            self.unsafe_io.read();
        }
    }

    /// 标记非活跃并广播 `inactive`；已经非活跃时为空操作。
    pub fn inactive_channel(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!(channel = self.id(), serial = self.serial, "channel inactive");
        self.pipeline.fire_inactive();
        if let Some(parent) = self.parent() {
            parent.children.remove(&self.serial);
        }
    }

    /// 释放资源：取消排队中的写入并广播 `unregistered`，至多执行一次。
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = self.unsafe_io.cancel_pending_writes();
        debug!(channel = self.id(), dropped, "channel released");
        self.pipeline.fire_unregistered();
    }

    /// 绑定。
    pub fn bind(&self, addr: Option<SocketAddr>) -> ChannelFuture {
        self.pipeline.bind(addr)
    }

    /// 关闭。
    pub fn close(&self) -> ChannelFuture {
        self.pipeline.close()
    }

    /// 连接。
    pub fn connect(&self, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> ChannelFuture {
        self.pipeline.connect(local, remote)
    }

    /// 断开。
    pub fn disconnect(&self) -> ChannelFuture {
        self.pipeline.disconnect()
    }

    /// 注销。
    pub fn deregister(&self) -> ChannelFuture {
        self.pipeline.deregister()
    }

    /// 请求读取。
    pub fn read(&self) {
        self.pipeline.read();
    }

    /// 写入一条消息。
    pub fn write(&self, message: Message) -> ChannelFuture {
        self.pipeline.write(message)
    }

    /// 从 head 注入一条入站消息。
    pub fn fire_read(&self, message: Message) {
        self.pipeline.fire_read(message);
    }

    /// 从 head 注入读完成事件。
    pub fn fire_read_completed(&self) {
        self.pipeline.fire_read_completed();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("serial", &self.serial)
            .field("kind", &self.kind)
            .field("transport", &self.transport.name())
            .field("active", &self.is_active())
            .finish()
    }
}
