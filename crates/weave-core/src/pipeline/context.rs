//! Handler 上下文：链路中某个位置的轻量视图。
//!
//! # 教案式说明
//! - **意图（Why）**：Handler 不持有通道或流水线，只在每次回调时拿到一个上下文，用它继续传播事件。
//! - **逻辑（How）**：上下文 = (流水线, 分发开始时的链路快照, 下标)。`next`/`prev` 只是下标加减，
//!   因此整次分发都走在同一份快照上，与并发的结构变更互不干扰。
//! - **契约（What）**：
//!   - 入站 `fire_*` 调用下一个上下文；出站 `write/bind/close/connect/disconnect` 调用上一个上下文；
//!   - `fire_error_caught` 调用上一个上下文，即错误向 head 方向传播；
//!   - 每次回调都在 panic 边界内执行，panic 被转换为 [`ChannelError::Caught`]，记录日志后交给
//!     **当前**上下文的 `error_caught`。`error_caught` 自身的 panic 只记录，不再传播。

use std::{
    any::Any,
    fmt,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::{debug, error};

use crate::{Message, channel::Channel, error::ChannelError, future::ChannelFuture};

use super::{Pipeline, chain::Chain, handler::Handler};

/// 绑定到链路某个位置的上下文。
#[derive(Clone)]
pub struct HandlerContext {
    pipeline: Arc<Pipeline>,
    chain: Chain,
    index: usize,
}

impl HandlerContext {
    pub(crate) fn new(pipeline: Arc<Pipeline>, chain: Chain, index: usize) -> Self {
        debug_assert!(index < chain.len());
        Self {
            pipeline,
            chain,
            index,
        }
    }

    /// 上下文名称。
    pub fn name(&self) -> &str {
        &self.chain[self.index].name
    }

    /// 绑定的 Handler。
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.chain[self.index].handler
    }

    /// 所属流水线。
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// 所属通道；通道已被回收时返回 `None`。
    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.pipeline.channel()
    }

    /// 以所属通道为关联创建新的 Future。
    pub fn new_future(&self) -> ChannelFuture {
        self.pipeline.new_future()
    }

    /// 是否为 head 哨兵。
    pub fn is_head(&self) -> bool {
        self.index == 0
    }

    /// 是否为 tail 哨兵。
    pub fn is_tail(&self) -> bool {
        self.index + 1 == self.chain.len()
    }

    /// 下一个（靠近 tail 的）上下文。
    pub fn next(&self) -> Option<HandlerContext> {
        (self.index + 1 < self.chain.len()).then(|| self.at(self.index + 1))
    }

    /// 上一个（靠近 head 的）上下文。
    pub fn prev(&self) -> Option<HandlerContext> {
        self.index.checked_sub(1).map(|index| self.at(index))
    }

    fn at(&self, index: usize) -> HandlerContext {
        HandlerContext {
            pipeline: Arc::clone(&self.pipeline),
            chain: Arc::clone(&self.chain),
            index,
        }
    }

    /// 把 `registered` 交给下一个上下文；tail 上调用为空操作。
    pub fn fire_registered(&self) {
        if let Some(next) = self.next() {
            next.invoke(|handler, ctx| handler.registered(ctx));
        }
    }

    /// 把 `unregistered` 交给下一个上下文。
    pub fn fire_unregistered(&self) {
        if let Some(next) = self.next() {
            next.invoke(|handler, ctx| handler.unregistered(ctx));
        }
    }

    /// 把 `active` 交给下一个上下文。
    pub fn fire_active(&self) {
        if let Some(next) = self.next() {
            next.invoke(|handler, ctx| handler.active(ctx));
        }
    }

    /// 把 `inactive` 交给下一个上下文。
    pub fn fire_inactive(&self) {
        if let Some(next) = self.next() {
            next.invoke(|handler, ctx| handler.inactive(ctx));
        }
    }

    /// 把入站消息交给下一个上下文；tail 之后的消息被丢弃。
    pub fn fire_read(&self, message: Message) {
        if let Some(next) = self.next() {
            next.invoke(move |handler, ctx| handler.read(ctx, message));
        }
    }

    /// 把读取结束事件交给下一个上下文。
    pub fn fire_read_completed(&self) {
        if let Some(next) = self.next() {
            next.invoke(|handler, ctx| handler.read_completed(ctx));
        }
    }

    /// 注销沿 head→tail 传播；越过 tail 时直接完成 `future`。
    pub fn fire_deregister(&self, future: ChannelFuture) {
        match self.next() {
            Some(next) => next.invoke(move |handler, ctx| handler.deregister(ctx, future)),
            None => {
                future.completable().complete();
            }
        }
    }

    /// 把错误交给上一个上下文；head 上调用时直接丢弃并记录。
    pub fn fire_error_caught(&self, error: ChannelError) {
        match self.prev() {
            Some(prev) => prev.invoke_error_caught(error),
            None => debug!(context = self.name(), %error, "error dropped past the head"),
        }
    }

    /// 把写入交给上一个（靠近 head 的）上下文；越过 head 时取消 `future`。
    pub fn write(&self, message: Message, future: ChannelFuture) {
        match self.prev() {
            Some(prev) => prev.invoke(move |handler, ctx| handler.write(ctx, message, future)),
            None => Self::outbound_past_head(future),
        }
    }

    /// 向 head 方向传播绑定。
    pub fn bind(&self, addr: Option<SocketAddr>, future: ChannelFuture) {
        match self.prev() {
            Some(prev) => prev.invoke(move |handler, ctx| handler.bind(ctx, addr, future)),
            None => Self::outbound_past_head(future),
        }
    }

    /// 向 head 方向传播关闭。
    pub fn close(&self, future: ChannelFuture) {
        match self.prev() {
            Some(prev) => prev.invoke(move |handler, ctx| handler.close(ctx, future)),
            None => Self::outbound_past_head(future),
        }
    }

    /// 向 head 方向传播连接。
    pub fn connect(
        &self,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
        future: ChannelFuture,
    ) {
        match self.prev() {
            Some(prev) => {
                prev.invoke(move |handler, ctx| handler.connect(ctx, local, remote, future))
            }
            None => Self::outbound_past_head(future),
        }
    }

    /// 向 head 方向传播断开。
    pub fn disconnect(&self, future: ChannelFuture) {
        match self.prev() {
            Some(prev) => prev.invoke(move |handler, ctx| handler.disconnect(ctx, future)),
            None => Self::outbound_past_head(future),
        }
    }

    /// head 的 Handler 是出站终点；只有自定义 Handler 替换了 head 行为才会走到这里。
    fn outbound_past_head(future: ChannelFuture) {
        debug!("outbound operation propagated past the head");
        future.completable().cancel();
    }

    /// 在 panic 边界内执行当前上下文的 Handler 回调。
    pub(crate) fn invoke<F>(&self, callback: F)
    where
        F: FnOnce(&dyn Handler, &HandlerContext),
    {
        let handler = Arc::clone(self.handler());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(handler.as_ref(), self)));
        if let Err(payload) = outcome {
            let caught = ChannelError::Caught {
                handler: self.name().to_owned(),
                message: panic_message(payload.as_ref()),
            };
            error!(context = self.name(), error = %caught, "handler panicked");
            self.invoke_error_caught(caught);
        }
    }

    fn invoke_error_caught(&self, error: ChannelError) {
        let handler = Arc::clone(self.handler());
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| handler.error_caught(self, error)));
        if let Err(payload) = outcome {
            error!(
                context = self.name(),
                panic = %panic_message(payload.as_ref()),
                "error_caught panicked; error dropped"
            );
        }
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("name", &self.name())
            .field("index", &self.index)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_handles_common_payloads() {
        let static_payload: Box<dyn Any + Send> = Box::new("static");
        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other_payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(static_payload.as_ref()), "static");
        assert_eq!(panic_message(owned_payload.as_ref()), "owned");
        assert_eq!(panic_message(other_payload.as_ref()), "non-string panic payload");
    }
}
