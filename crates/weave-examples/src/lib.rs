//! weave-examples：行协议回显服务。
//!
//! # 教案级概览
//! - **意图 (Why)**：把传输、编解码插件与业务 Handler 串成一条完整链路，作为新协议接入的参照；
//! - **逻辑 (How)**：
//!   1. [`ServerBootstrap`] 选择 [`NetServerChannel`] 作为服务端传输；
//!   2. 子 Handler 是一个 [`ChannelInitializer`]，为每个子通道装配独立的解码缓冲、编码器与
//!      [`LineEchoHandler`]；
//!   3. 入站字节经解码变为 `String`，回显时再经编码器追加换行；
//! - **契约 (What)**：客户端发送 `quit` 时服务端关闭该连接；其余每行原样回写。

use std::{net::SocketAddr, sync::Arc};

use tracing::{debug, info};
use weave_codec_line::LineDelimitedCodec;
use weave_core::{
    Channel, ChannelError, ChannelInitializer, Handler, HandlerContext, LoggingHandler, Message,
    Params, ServerBootstrap,
    codec::{DecoderHandler, EncoderHandler},
    params::keys,
};
use weave_transport_tcp::NetServerChannel;

/// 结束会话的命令。
pub const QUIT_COMMAND: &str = "quit";

/// 回显每一行文本；收到 [`QUIT_COMMAND`] 时关闭连接。
#[derive(Debug, Default)]
pub struct LineEchoHandler;

impl Handler for LineEchoHandler {
    fn read(&self, ctx: &HandlerContext, message: Message) {
        let line = match message.downcast::<String>() {
            Ok(line) => *line,
            Err(other) => {
                ctx.fire_read(other);
                return;
            }
        };
        if line.trim() == QUIT_COMMAND {
            debug!(context = ctx.name(), "quit requested");
            ctx.close(ctx.new_future());
            return;
        }
        ctx.write(Box::new(line), ctx.new_future());
    }

    fn read_completed(&self, _ctx: &HandlerContext) {}
}

/// 为一个子通道装配行协议流水线。
///
/// `max_frame_length` 取自通道参数 [`keys::MAX_FRAME_LENGTH`]，同时约束解码缓冲与单行长度。
pub fn install_line_pipeline(channel: &Arc<Channel>) {
    let limit = channel
        .params()
        .usize_or(keys::MAX_FRAME_LENGTH, keys::DEFAULT_MAX_FRAME_LENGTH);
    let pipeline = channel.pipeline();
    pipeline
        .add_last("logging", Arc::new(LoggingHandler::new("line-echo")))
        .add_last(
            "decoder",
            Arc::new(DecoderHandler::with_max_frame_length(
                LineDelimitedCodec::with_max_line_length(limit),
                limit,
            )),
        )
        .add_last(
            "encoder",
            Arc::new(EncoderHandler::new(LineDelimitedCodec::with_max_line_length(limit))),
        )
        .add_last("echo", Arc::new(LineEchoHandler));
}

/// 运行中的回显服务。
pub struct LineEchoServer {
    channel: Arc<Channel>,
    local_addr: SocketAddr,
}

impl LineEchoServer {
    /// 绑定 `addr` 并开始接受连接。`child_params` 会复制到每个子通道。
    pub async fn bind(addr: SocketAddr, child_params: &Params) -> Result<Self, ChannelError> {
        let transport = Arc::new(NetServerChannel::new());
        let shared = Arc::clone(&transport);
        let bound = ServerBootstrap::new()
            .child_handler(Arc::new(ChannelInitializer::new(install_line_pipeline)))
            .channel_type(
                move |_: &Params| -> Result<Arc<dyn weave_core::Transport>, ChannelError> {
                    Ok(Arc::clone(&shared) as Arc<dyn weave_core::Transport>)
                },
            )
            .child_params(child_params)
            .bind(Some(addr));
        bound.wait().await;
        if let Some(error) = bound.error() {
            return Err(error);
        }
        let channel = bound.channel().ok_or(ChannelError::NilObject)?;
        let local_addr = transport.local_addr().ok_or(ChannelError::NilObject)?;
        info!(channel = channel.id(), %local_addr, "line echo server listening");
        Ok(Self {
            channel,
            local_addr,
        })
    }

    /// 实际监听地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 服务端通道。
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// 停止接受并关闭所有仍然活跃的连接。
    pub async fn shutdown(&self) {
        self.channel.close().wait().await;
        for child in self.channel.children() {
            child.close().wait().await;
        }
        info!(local_addr = %self.local_addr, "line echo server stopped");
    }
}
