use std::net::SocketAddr;

use tracing::debug;

use crate::{Message, error::ChannelError, future::ChannelFuture};

use super::{Handler, HandlerContext};

/// 以 `debug` 级别记录经过的每个事件，然后原样转发。
#[derive(Debug, Clone)]
pub struct LoggingHandler {
    label: &'static str,
}

impl LoggingHandler {
    /// `label` 会作为日志字段输出，用于区分流水线中的多个日志点。
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }

    fn channel_id(ctx: &HandlerContext) -> Option<String> {
        ctx.channel().map(|channel| channel.id().to_owned())
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self::new("pipeline")
    }
}

impl Handler for LoggingHandler {
    fn registered(&self, ctx: &HandlerContext) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), "REGISTERED");
        ctx.fire_registered();
    }

    fn unregistered(&self, ctx: &HandlerContext) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), "UNREGISTERED");
        ctx.fire_unregistered();
    }

    fn active(&self, ctx: &HandlerContext) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), "ACTIVE");
        ctx.fire_active();
    }

    fn inactive(&self, ctx: &HandlerContext) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), "INACTIVE");
        ctx.fire_inactive();
    }

    fn read(&self, ctx: &HandlerContext, message: Message) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), "READ");
        ctx.fire_read(message);
    }

    fn read_completed(&self, ctx: &HandlerContext) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), "READ_COMPLETED");
        ctx.fire_read_completed();
    }

    fn write(&self, ctx: &HandlerContext, message: Message, future: ChannelFuture) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), "WRITE");
        ctx.write(message, future);
    }

    fn bind(&self, ctx: &HandlerContext, addr: Option<SocketAddr>, future: ChannelFuture) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), ?addr, "BIND");
        ctx.bind(addr, future);
    }

    fn close(&self, ctx: &HandlerContext, future: ChannelFuture) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), "CLOSE");
        ctx.close(future);
    }

    fn connect(
        &self,
        ctx: &HandlerContext,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
        future: ChannelFuture,
    ) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), ?local, ?remote, "CONNECT");
        ctx.connect(local, remote, future);
    }

    fn disconnect(&self, ctx: &HandlerContext, future: ChannelFuture) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), "DISCONNECT");
        ctx.disconnect(future);
    }

    fn deregister(&self, ctx: &HandlerContext, future: ChannelFuture) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), "DEREGISTER");
        ctx.fire_deregister(future);
    }

    fn error_caught(&self, ctx: &HandlerContext, error: ChannelError) {
        debug!(label = self.label, channel = ?Self::channel_id(ctx), %error, "ERROR_CAUGHT");
        ctx.fire_error_caught(error);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Weak};

    use tracing_test::traced_test;

    use super::*;
    use crate::pipeline::Pipeline;

    #[traced_test]
    #[test]
    fn logs_and_forwards_errors_headward() {
        let pipeline = Pipeline::new(Weak::new());
        pipeline.add_last("log", Arc::new(LoggingHandler::new("edge")));

        pipeline.fire_error_caught(ChannelError::UnhandledRead);

        assert!(logs_contain("ERROR_CAUGHT"));
        assert!(logs_contain("edge"));
        assert!(
            logs_contain("unhandled error reached the head of the pipeline"),
            "错误应继续传播到 head 并由其记录"
        );
    }
}
