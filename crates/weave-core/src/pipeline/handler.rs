//! Handler 契约。
//!
//! # 教案式说明
//! - **意图（Why）**：协议层、编解码器、业务逻辑都以同一组回调挂入流水线；未覆写的回调只需把事件
//!   原样转交给下一个（入站）或上一个（出站）上下文。
//! - **逻辑（How）**：所有方法都有转发型默认实现。入站事件调用 `ctx.fire_*`，出站操作调用
//!   `ctx.write/bind/...`，错误沿 head 方向调用 `ctx.fire_error_caught`。
//! - **契约（What）**：
//!   - Handler 以 `Arc<dyn Handler>` 共享，需满足 `Send + Sync`；私有状态使用内部可变性；
//!   - 同一个实例可以挂在多个通道上，需要按通道隔离状态时使用
//!     [`ChannelInitializer`](super::ChannelInitializer) 为每个通道创建新实例；
//!   - 吞掉出站操作的 Handler 负责完成对应的 [`ChannelFuture`]。

use std::net::SocketAddr;

use crate::{Message, error::ChannelError, future::ChannelFuture};

use super::HandlerContext;

/// 流水线中的行为单元。
pub trait Handler: Send + Sync + 'static {
    /// 被加入流水线后调用，参数为 head 上下文。
    fn added(&self, _ctx: &HandlerContext) {}

    /// 被移出流水线后调用，参数为它在旧链路中的上下文。
    fn removed(&self, _ctx: &HandlerContext) {}

    /// 通道完成注册。
    fn registered(&self, ctx: &HandlerContext) {
        ctx.fire_registered();
    }

    /// 通道释放资源。
    fn unregistered(&self, ctx: &HandlerContext) {
        ctx.fire_unregistered();
    }

    /// 通道变为活跃。
    fn active(&self, ctx: &HandlerContext) {
        ctx.fire_active();
    }

    /// 通道变为非活跃。
    fn inactive(&self, ctx: &HandlerContext) {
        ctx.fire_inactive();
    }

    /// 收到一条入站消息。
    fn read(&self, ctx: &HandlerContext, message: Message) {
        ctx.fire_read(message);
    }

    /// 一轮读取结束。
    fn read_completed(&self, ctx: &HandlerContext) {
        ctx.fire_read_completed();
    }

    /// 出站写入。
    fn write(&self, ctx: &HandlerContext, message: Message, future: ChannelFuture) {
        ctx.write(message, future);
    }

    /// 出站绑定。
    fn bind(&self, ctx: &HandlerContext, addr: Option<SocketAddr>, future: ChannelFuture) {
        ctx.bind(addr, future);
    }

    /// 出站关闭。
    fn close(&self, ctx: &HandlerContext, future: ChannelFuture) {
        ctx.close(future);
    }

    /// 出站连接。
    fn connect(
        &self,
        ctx: &HandlerContext,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
        future: ChannelFuture,
    ) {
        ctx.connect(local, remote, future);
    }

    /// 出站断开。
    fn disconnect(&self, ctx: &HandlerContext, future: ChannelFuture) {
        ctx.disconnect(future);
    }

    /// 注销，沿入站方向传播，由 tail 完成清理。
    fn deregister(&self, ctx: &HandlerContext, future: ChannelFuture) {
        ctx.fire_deregister(future);
    }

    /// 捕获到错误；默认继续向 head 方向传播。
    fn error_caught(&self, ctx: &HandlerContext, error: ChannelError) {
        ctx.fire_error_caught(error);
    }
}
