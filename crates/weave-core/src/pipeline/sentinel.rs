//! head/tail 哨兵 Handler。

use std::net::SocketAddr;

use tracing::{debug, error};

use crate::{Message, error::ChannelError, future::ChannelFuture};

use super::{Handler, HandlerContext};

pub(crate) const HEAD_NAME: &str = "head";
pub(crate) const TAIL_NAME: &str = "tail";

/// 出站终点：把操作交给通道的执行器。
pub(crate) struct HeadHandler;

impl HeadHandler {
    fn with_unsafe<F>(ctx: &HandlerContext, future: ChannelFuture, op: F)
    where
        F: FnOnce(&crate::channel::ChannelUnsafe, ChannelFuture),
    {
        match ctx.channel() {
            Some(channel) => op(channel.unsafe_io(), future),
            None => {
                future.completable().fail(ChannelError::NilObject);
            }
        }
    }
}

impl Handler for HeadHandler {
    fn write(&self, ctx: &HandlerContext, message: Message, future: ChannelFuture) {
        Self::with_unsafe(ctx, future, |io, future| io.write(Some(message), future));
    }

    fn bind(&self, ctx: &HandlerContext, addr: Option<SocketAddr>, future: ChannelFuture) {
        Self::with_unsafe(ctx, future, |io, future| io.bind(addr, future));
    }

    fn close(&self, ctx: &HandlerContext, future: ChannelFuture) {
        Self::with_unsafe(ctx, future, |io, future| io.close(future));
    }

    fn connect(
        &self,
        ctx: &HandlerContext,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
        future: ChannelFuture,
    ) {
        Self::with_unsafe(ctx, future, |io, future| io.connect(local, remote, future));
    }

    fn disconnect(&self, ctx: &HandlerContext, future: ChannelFuture) {
        Self::with_unsafe(ctx, future, |io, future| io.disconnect(future));
    }

    fn error_caught(&self, ctx: &HandlerContext, error: ChannelError) {
        let channel = ctx.channel().map(|channel| channel.id().to_owned());
        error!(channel = ?channel, %error, "unhandled error reached the head of the pipeline");
    }
}

/// 入站终点：未消费的读报错，注销时完成清理。
pub(crate) struct TailHandler;

impl Handler for TailHandler {
    fn read(&self, ctx: &HandlerContext, _message: Message) {
        ctx.fire_error_caught(ChannelError::UnhandledRead);
    }

    fn read_completed(&self, _ctx: &HandlerContext) {}

    fn deregister(&self, ctx: &HandlerContext, future: ChannelFuture) {
        if let Some(channel) = ctx.channel() {
            debug!(channel = channel.id(), "deregister reached the tail");
            channel.inactive_channel();
            channel.release();
        }
        future.completable().complete();
    }
}
