//! 通道流水线。
//!
//! # 教案式说明
//! - **意图（Why）**：把通道上的事件组织成一条有序的 Handler 链：入站事件 head→tail，出站操作
//!   tail→head，并在 head 交给执行器完成真实 I/O。
//! - **逻辑（How）**：
//!   1. 链路存放在 [`chain::ChainBuffer`] 中，首尾固定为 head/tail 哨兵；
//!   2. 结构变更由 `mutation` 互斥锁串行化，复制当前快照、修改、提交并自增 epoch；
//!   3. 分发时加载一次快照，整次事件传播都在这份快照上进行。
//! - **契约（What）**：
//!   - 上下文名称在流水线内唯一；`head`/`tail` 为保留名，永远不会被移除；
//!   - 找不到目标时 `add_before`/`remove*` 为空操作；
//!   - `added` 回调收到 head 上下文，`removed` 回调收到节点在旧链路中的上下文；回调都在变更锁释放后
//!     执行，因此可以在回调里继续修改流水线。
//! - **风险提示（Trade-offs）**：每次变更复制一次 `Vec<Arc<_>>`，适合“装配多、变更少”的流水线；
//!   与此前无锁链表的语义差别是：正在传播的事件看不到传播开始后才发生的变更。

mod chain;
mod context;
mod handler;
mod initializer;
mod logging;
mod sentinel;

use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    Message,
    channel::Channel,
    error::ChannelError,
    future::ChannelFuture,
    params::{ParamValue, Params},
};

use chain::{ChainBuffer, ContextEntry};
use sentinel::{HEAD_NAME, HeadHandler, TAIL_NAME, TailHandler};

pub use context::HandlerContext;
pub use handler::Handler;
pub use initializer::ChannelInitializer;
pub use logging::LoggingHandler;

/// 由 head/tail 哨兵界定的 Handler 链。
pub struct Pipeline {
    channel: Weak<Channel>,
    chain: ChainBuffer,
    mutation: Mutex<()>,
    params: Params,
}

enum Position<'a> {
    First,
    Last,
    Before(&'a str),
}

impl Pipeline {
    pub(crate) fn new(channel: Weak<Channel>) -> Arc<Self> {
        Arc::new(Self {
            channel,
            chain: ChainBuffer::new(vec![
                ContextEntry::new(HEAD_NAME, Arc::new(HeadHandler)),
                ContextEntry::new(TAIL_NAME, Arc::new(TailHandler)),
            ]),
            mutation: Mutex::new(()),
            params: Params::new(),
        })
    }

    /// 所属通道。
    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.upgrade()
    }

    /// 流水线自己的参数袋（与通道参数相互独立）。
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// 读取参数。
    pub fn param(&self, key: &str) -> Option<ParamValue> {
        self.params.get(key)
    }

    /// 写入参数。
    pub fn set_param(&self, key: impl Into<String>, value: impl Into<ParamValue>) -> &Self {
        self.params.set(key, value);
        self
    }

    /// 以所属通道为关联创建新的 Future。
    pub fn new_future(&self) -> ChannelFuture {
        ChannelFuture::affiliated(self.channel.clone())
    }

    /// 当前结构版本，每次成功变更加一。
    pub fn epoch(&self) -> u64 {
        self.chain.epoch()
    }

    /// 用户 Handler 的名称，按链路顺序排列（不含哨兵）。
    pub fn names(&self) -> Vec<String> {
        let chain = self.chain.load();
        chain[1..chain.len() - 1]
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// 用户 Handler 数量。
    pub fn len(&self) -> usize {
        self.chain.load().len() - 2
    }

    /// 是否只剩哨兵。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// head 上下文。
    pub fn head_context(self: &Arc<Self>) -> HandlerContext {
        HandlerContext::new(Arc::clone(self), self.chain.load(), 0)
    }

    /// tail 上下文。
    pub fn tail_context(self: &Arc<Self>) -> HandlerContext {
        let chain = self.chain.load();
        let tail = chain.len() - 1;
        HandlerContext::new(Arc::clone(self), chain, tail)
    }

    /// 按名称查找上下文（包括 `head`/`tail`）。
    pub fn context(self: &Arc<Self>, name: &str) -> Option<HandlerContext> {
        let chain = self.chain.load();
        let index = chain.iter().position(|entry| entry.name == name)?;
        Some(HandlerContext::new(Arc::clone(self), chain, index))
    }

    /// 在 tail 之前追加。
    pub fn add_last(
        self: &Arc<Self>,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> &Arc<Self> {
        self.insert(Position::Last, name.into(), handler)
    }

    /// 在 head 之后插入。
    pub fn add_first(
        self: &Arc<Self>,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> &Arc<Self> {
        self.insert(Position::First, name.into(), handler)
    }

    /// 在名为 `target` 的上下文之前插入；找不到目标时为空操作。
    pub fn add_before(
        self: &Arc<Self>,
        target: &str,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> &Arc<Self> {
        self.insert(Position::Before(target), name.into(), handler)
    }

    fn insert(
        self: &Arc<Self>,
        position: Position<'_>,
        name: String,
        handler: Arc<dyn Handler>,
    ) -> &Arc<Self> {
        let epoch = {
            let _guard = self.mutation.lock();
            let current = self.chain.load();
            let taken = current.iter().any(|entry| entry.name == name);
            if taken || name == HEAD_NAME || name == TAIL_NAME {
                warn!(%name, "handler name is reserved or already in use; add ignored");
                return self;
            }
            let index = match position {
                Position::First => 1,
                Position::Last => current.len() - 1,
                Position::Before(target) => {
                    // head 之前不能插入。
                    match current.iter().skip(1).position(|entry| entry.name == target) {
                        Some(offset) => offset + 1,
                        None => {
                            debug!(%target, %name, "add_before target not found");
                            return self;
                        }
                    }
                }
            };
            let mut next: Vec<_> = current.iter().cloned().collect();
            next.insert(index, ContextEntry::new(name.clone(), Arc::clone(&handler)));
            self.chain.commit(next)
        };
        debug!(%name, epoch, "handler added");
        let head = self.head_context();
        head.invoke(|_, ctx| handler.added(ctx));
        self
    }

    /// 移除 head 之后的第一个用户 Handler；流水线为空时为空操作。
    pub fn remove_first(self: &Arc<Self>) -> &Arc<Self> {
        self.remove_where(|index, _, len| index == 1 && len > 2)
    }

    /// 按实例身份移除第一个匹配的 Handler。
    pub fn remove(self: &Arc<Self>, handler: &Arc<dyn Handler>) -> &Arc<Self> {
        self.remove_where(|_, entry, _| Arc::ptr_eq(&entry.handler, handler))
    }

    /// 按名称移除；`head`/`tail` 不可移除。
    pub fn remove_by_name(self: &Arc<Self>, name: &str) -> &Arc<Self> {
        self.remove_where(|_, entry, _| entry.name == name)
    }

    fn remove_where<P>(self: &Arc<Self>, predicate: P) -> &Arc<Self>
    where
        P: Fn(usize, &ContextEntry, usize) -> bool,
    {
        let (removed, old_chain, index) = {
            let _guard = self.mutation.lock();
            let current = self.chain.load();
            let len = current.len();
            let found = current
                .iter()
                .enumerate()
                .skip(1)
                .take(len - 2)
                .find(|(index, entry)| predicate(*index, &***entry, len))
                .map(|(index, _)| index);
            let Some(index) = found else {
                return self;
            };
            let mut next: Vec<_> = current.iter().cloned().collect();
            let removed = next.remove(index);
            let epoch = self.chain.commit(next);
            debug!(name = %removed.name, epoch, "handler removed");
            (removed, current, index)
        };
        let ctx = HandlerContext::new(Arc::clone(self), old_chain, index);
        ctx.invoke(|_, ctx| removed.handler.removed(ctx));
        self
    }

    /// 移除所有用户 Handler，恢复为 head↔tail。
    pub fn clear(self: &Arc<Self>) -> &Arc<Self> {
        let old_chain = {
            let _guard = self.mutation.lock();
            let current = self.chain.load();
            if current.len() == 2 {
                return self;
            }
            let reset = vec![Arc::clone(&current[0]), Arc::clone(&current[current.len() - 1])];
            let epoch = self.chain.commit(reset);
            debug!(epoch, "pipeline cleared");
            current
        };
        for index in 1..old_chain.len() - 1 {
            let ctx = HandlerContext::new(Arc::clone(self), Arc::clone(&old_chain), index);
            let handler = Arc::clone(ctx.handler());
            ctx.invoke(|_, ctx| handler.removed(ctx));
        }
        self
    }

    /// 从 head 广播 `registered`。
    pub fn fire_registered(self: &Arc<Self>) {
        let head = self.head_context();
        head.invoke(|handler, ctx| handler.registered(ctx));
    }

    /// 从 head 广播 `unregistered`。
    pub fn fire_unregistered(self: &Arc<Self>) {
        let head = self.head_context();
        head.invoke(|handler, ctx| handler.unregistered(ctx));
    }

    /// 从 head 广播 `active`；由执行器在通道激活后调用。
    pub fn fire_active(self: &Arc<Self>) {
        let head = self.head_context();
        head.invoke(|handler, ctx| handler.active(ctx));
    }

    /// 从 head 广播 `inactive`。
    pub fn fire_inactive(self: &Arc<Self>) {
        let head = self.head_context();
        head.invoke(|handler, ctx| handler.inactive(ctx));
    }

    /// 从 head 注入一条入站消息。
    pub fn fire_read(self: &Arc<Self>, message: Message) {
        let head = self.head_context();
        head.invoke(move |handler, ctx| handler.read(ctx, message));
    }

    /// 从 head 广播一轮读取结束。
    pub fn fire_read_completed(self: &Arc<Self>) {
        let head = self.head_context();
        head.invoke(|handler, ctx| handler.read_completed(ctx));
    }

    /// 从 tail 注入错误，沿 head 方向传播。
    pub fn fire_error_caught(self: &Arc<Self>, error: ChannelError) {
        let tail = self.tail_context();
        tail.invoke(move |handler, ctx| handler.error_caught(ctx, error));
    }

    /// 请求执行器开始读取。
    pub fn read(&self) {
        if let Some(channel) = self.channel() {
            channel.unsafe_io().read();
        }
    }

    /// 从 tail 发起写入。
    pub fn write(self: &Arc<Self>, message: Message) -> ChannelFuture {
        let future = self.new_future();
        let tail = self.tail_context();
        let pending = future.clone();
        tail.invoke(move |handler, ctx| handler.write(ctx, message, pending));
        future
    }

    /// 从 tail 发起绑定；`None` 地址会立即取消返回的 Future。
    pub fn bind(self: &Arc<Self>, addr: Option<SocketAddr>) -> ChannelFuture {
        let future = self.new_future();
        let tail = self.tail_context();
        let pending = future.clone();
        tail.invoke(move |handler, ctx| handler.bind(ctx, addr, pending));
        future
    }

    /// 从 tail 发起关闭。
    pub fn close(self: &Arc<Self>) -> ChannelFuture {
        let future = self.new_future();
        let tail = self.tail_context();
        let pending = future.clone();
        tail.invoke(move |handler, ctx| handler.close(ctx, pending));
        future
    }

    /// 从 tail 发起连接；`None` 远端地址会立即取消返回的 Future。
    pub fn connect(
        self: &Arc<Self>,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
    ) -> ChannelFuture {
        let future = self.new_future();
        let tail = self.tail_context();
        let pending = future.clone();
        tail.invoke(move |handler, ctx| handler.connect(ctx, local, remote, pending));
        future
    }

    /// 从 tail 发起断开。
    pub fn disconnect(self: &Arc<Self>) -> ChannelFuture {
        let future = self.new_future();
        let tail = self.tail_context();
        let pending = future.clone();
        tail.invoke(move |handler, ctx| handler.disconnect(ctx, pending));
        future
    }

    /// 从 head 发起注销，由 tail 完成失活与资源释放。
    pub fn deregister(self: &Arc<Self>) -> ChannelFuture {
        let future = self.new_future();
        let head = self.head_context();
        let pending = future.clone();
        head.invoke(move |handler, ctx| handler.deregister(ctx, pending));
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named;
    impl Handler for Named {}

    fn detached_pipeline() -> Arc<Pipeline> {
        Pipeline::new(Weak::new())
    }

    #[test]
    fn reserved_and_duplicate_names_are_rejected() {
        let pipeline = detached_pipeline();
        pipeline
            .add_last("codec", Arc::new(Named))
            .add_last("codec", Arc::new(Named))
            .add_last(HEAD_NAME, Arc::new(Named));
        assert_eq!(pipeline.names(), vec!["codec".to_owned()]);
        assert_eq!(pipeline.epoch(), 1, "被拒绝的添加不应提交新快照");
    }

    #[test]
    fn add_before_cannot_target_head() {
        let pipeline = detached_pipeline();
        pipeline.add_before(HEAD_NAME, "x", Arc::new(Named));
        assert!(pipeline.is_empty());
        pipeline.add_before(TAIL_NAME, "y", Arc::new(Named));
        assert_eq!(pipeline.names(), vec!["y".to_owned()]);
    }

    #[test]
    fn sentinels_survive_removal_attempts() {
        let pipeline = detached_pipeline();
        pipeline.remove_by_name(HEAD_NAME).remove_by_name(TAIL_NAME).clear();
        assert!(pipeline.context(HEAD_NAME).is_some());
        assert!(pipeline.context(TAIL_NAME).is_some());
        assert_eq!(pipeline.epoch(), 0);
    }

    #[test]
    fn detached_pipeline_fails_outbound_operations() {
        let pipeline = detached_pipeline();
        let future = pipeline.write(Box::new(1u8));
        assert!(future.is_fail(), "无通道时 head 无法交给执行器");
        assert!(matches!(future.error(), Some(ChannelError::NilObject)));
    }
}
