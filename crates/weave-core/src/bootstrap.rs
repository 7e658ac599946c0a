//! 客户端与服务端引导器。
//!
//! # 教案式说明
//! - **意图（Why）**：把“选择传输、准备参数、挂上根 Handler、发起连接/绑定”收敛成一条链式调用。
//! - **逻辑（How）**：[`TransportFactory`] 根据参数构造传输实例；引导器据此构造完整装配的
//!   [`Channel`]，把根 Handler 以 `"handler"` 为名追加到流水线，广播 `registered`，再从流水线发起
//!   `connect`/`bind`。
//! - **契约（What）**：缺少通道类型或 tokio 运行时、或者工厂返回错误时，返回的 Future 已经失败，
//!   不会创建通道；否则返回的 Future 强引用新通道，成功后可经 [`ChannelFuture::channel`] 取回。

use std::{net::SocketAddr, sync::Arc};

use tokio::runtime::Handle;
use tracing::debug;

use crate::{
    channel::Channel,
    error::ChannelError,
    future::ChannelFuture,
    params::{ParamValue, Params},
    pipeline::Handler,
    transport::Transport,
};

/// 按参数构造传输实例。
pub trait TransportFactory: Send + Sync {
    /// 构造一个新的传输。
    fn create(&self, params: &Params) -> Result<Arc<dyn Transport>, ChannelError>;
}

impl<F> TransportFactory for F
where
    F: Fn(&Params) -> Result<Arc<dyn Transport>, ChannelError> + Send + Sync,
{
    fn create(&self, params: &Params) -> Result<Arc<dyn Transport>, ChannelError> {
        self(params)
    }
}

fn resolve_runtime(configured: &Option<Handle>) -> Result<Handle, ChannelError> {
    configured
        .clone()
        .or_else(|| Handle::try_current().ok())
        .ok_or(ChannelError::Misconfigured("no tokio runtime available"))
}

fn retain(channel: &Arc<Channel>, pending: ChannelFuture) -> ChannelFuture {
    let retained = ChannelFuture::retaining(channel);
    pending.propagate_to(&retained);
    retained
}

/// 客户端引导器。
#[derive(Clone, Default)]
pub struct Bootstrap {
    handler: Option<Arc<dyn Handler>>,
    factory: Option<Arc<dyn TransportFactory>>,
    params: Params,
    runtime: Option<Handle>,
}

impl Bootstrap {
    /// 空引导器；至少还需要 [`Bootstrap::channel_type`]。
    pub fn new() -> Self {
        Self::default()
    }

    /// 根 Handler。
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// 通道类型。
    pub fn channel_type(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// 追加一个通道参数。
    pub fn set_param(self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.set(key, value);
        self
    }

    /// 合并一组通道参数。
    pub fn params(self, params: &Params) -> Self {
        self.params.extend_from(params);
        self
    }

    /// 执行器任务使用的运行时；未设置时使用调用线程所在的运行时。
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// 构造客户端通道并发起连接。
    pub fn connect(&self, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> ChannelFuture {
        match self.build() {
            Ok(channel) => {
                debug!(channel = channel.id(), ?remote, "bootstrap connect");
                retain(&channel, channel.connect(local, remote))
            }
            Err(error) => ChannelFuture::failed(None, error),
        }
    }

    fn build(&self) -> Result<Arc<Channel>, ChannelError> {
        let factory = self
            .factory
            .as_ref()
            .ok_or(ChannelError::Misconfigured("channel type not set"))?;
        let runtime = resolve_runtime(&self.runtime)?;
        let params = self.params.clone();
        let transport = factory.create(&params)?;
        let channel = Channel::client(transport, params, runtime);
        if let Some(handler) = &self.handler {
            channel.pipeline().add_last("handler", Arc::clone(handler));
        }
        channel.pipeline().fire_registered();
        Ok(channel)
    }
}

/// 服务端引导器。
#[derive(Clone, Default)]
pub struct ServerBootstrap {
    handler: Option<Arc<dyn Handler>>,
    child_handler: Option<Arc<dyn Handler>>,
    factory: Option<Arc<dyn TransportFactory>>,
    params: Params,
    child_params: Params,
    runtime: Option<Handle>,
}

impl ServerBootstrap {
    /// 空引导器；子通道不设 Handler 时只挂默认 head/tail。
    pub fn new() -> Self {
        Self::default()
    }

    /// 服务端通道自身的根 Handler。
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// 装到每个被接受子通道上的 Handler。
    pub fn child_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.child_handler = Some(handler);
        self
    }

    /// 服务端通道类型。
    pub fn channel_type(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// 追加一个服务端通道参数。
    pub fn set_param(self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.set(key, value);
        self
    }

    /// 追加一个子通道参数。
    pub fn set_child_param(self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.child_params.set(key, value);
        self
    }

    /// 合并一组子通道参数。
    pub fn child_params(self, params: &Params) -> Self {
        self.child_params.extend_from(params);
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// 构造服务端通道并绑定；绑定成功后执行器开始接受子连接。
    pub fn bind(&self, addr: Option<SocketAddr>) -> ChannelFuture {
        match self.build() {
            Ok(channel) => {
                debug!(channel = channel.id(), ?addr, "bootstrap bind");
                retain(&channel, channel.bind(addr))
            }
            Err(error) => ChannelFuture::failed(None, error),
        }
    }

    fn build(&self) -> Result<Arc<Channel>, ChannelError> {
        let factory = self
            .factory
            .as_ref()
            .ok_or(ChannelError::Misconfigured("channel type not set"))?;
        let runtime = resolve_runtime(&self.runtime)?;
        let params = self.params.clone();
        let transport = factory.create(&params)?;
        let channel = Channel::server(
            transport,
            params,
            self.child_handler.clone(),
            self.child_params.clone(),
            runtime,
        );
        if let Some(handler) = &self.handler {
            channel.pipeline().add_last("handler", Arc::clone(handler));
        }
        channel.pipeline().fire_registered();
        Ok(channel)
    }
}
