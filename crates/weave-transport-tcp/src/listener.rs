use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    net::TcpListener,
    sync::{Mutex as AsyncMutex, watch},
};
use tracing::{debug, error, warn};
use weave_core::{
    Channel, ChannelError, ChannelFuture, Params, Transport,
    transport::{UnsafeAccept, UnsafeBind, UnsafeClose},
};

use crate::{
    NetChannel,
    config::TcpSocketConfig,
    error::{self, map_io_error},
};

/// 连续接受失败时的最大退避（秒）；超过后放弃并使服务端通道失活。
const MAX_ACCEPT_BACKOFF_SECS: u64 = 64;

/// 监听并接受连接的 TCP 传输。
///
/// # 教案式说明
/// - **意图（Why）**：服务端通道只需要绑定、接受与关闭；每个被接受的连接成为一个子通道，携带
///   服务端引导器配置的子参数与子 Handler。
/// - **逻辑（How）**：
///   - 监听器放在 `tokio::sync::Mutex` 中，接受时持锁等待；关闭先经 `watch` 广播停止信号，正在等待的
///     `accept` 随即返回 `None`，释放锁后再取走监听器；
///   - 接受出错时按 1s、2s、4s…翻倍退避重试，超过 64s 仍失败则放弃。
/// - **契约（What）**：`unsafe_accept` 返回 `(None, _)` 表示监听已停止；返回的子通道尚未注册，由执行器
///   负责广播 `registered` 并激活。
pub struct NetServerChannel {
    listener: AsyncMutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
}

impl Default for NetServerChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl NetServerChannel {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            listener: AsyncMutex::new(None),
            local_addr: Mutex::new(None),
            shutdown,
        }
    }

    /// 供 [`ServerBootstrap::channel_type`](weave_core::ServerBootstrap::channel_type) 使用的工厂。
    pub fn factory()
    -> impl Fn(&Params) -> Result<Arc<dyn Transport>, ChannelError> + Send + Sync + 'static {
        |_: &Params| -> Result<Arc<dyn Transport>, ChannelError> { Ok(Arc::new(Self::new())) }
    }

    /// 实际绑定的地址；绑定端口 0 时可据此得知系统分配的端口。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    fn child_config(parent: &Arc<Channel>) -> TcpSocketConfig {
        match parent.child_params() {
            Some(params) => TcpSocketConfig::from_params(params),
            None => TcpSocketConfig::default(),
        }
    }
}

fn stopped() -> (Option<Arc<Channel>>, ChannelFuture) {
    (None, ChannelFuture::detached())
}

#[async_trait]
impl UnsafeBind for NetServerChannel {
    async fn unsafe_bind(&self, addr: SocketAddr) -> Result<(), ChannelError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| map_io_error(error::BIND, err))?;
        let local = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        *self.listener.lock().await = Some(listener);
        *self.local_addr.lock() = Some(local);
        self.shutdown.send_replace(false);
        debug!(%local, "tcp listener bound");
        Ok(())
    }
}

#[async_trait]
impl UnsafeAccept for NetServerChannel {
    async fn unsafe_accept(&self, parent: &Arc<Channel>) -> (Option<Arc<Channel>>, ChannelFuture) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return stopped();
        }
        let guard = self.listener.lock().await;
        let Some(listener) = guard.as_ref() else {
            return stopped();
        };

        let mut backoff = 1;
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.changed() => return stopped(),
            };
            match accepted {
                Ok((stream, peer)) => {
                    let transport = match NetChannel::from_stream(stream, Self::child_config(parent))
                    {
                        Ok(transport) => transport,
                        Err(err) => {
                            warn!(%peer, error = %err, "dropping accepted connection");
                            continue;
                        }
                    };
                    let child = Channel::accept_child(parent, Arc::new(transport));
                    debug!(parent = parent.id(), child = child.id(), %peer, "tcp connection accepted");
                    let future = ChannelFuture::new(Some(&child));
                    return (Some(child), future);
                }
                Err(err) => {
                    if backoff > MAX_ACCEPT_BACKOFF_SECS {
                        let failure = map_io_error(error::ACCEPT, err);
                        error!(channel = parent.id(), error = %failure, "accept keeps failing; giving up");
                        self.shutdown.send_replace(true);
                        parent.inactive_channel();
                        return (None, ChannelFuture::failed(Some(parent), failure));
                    }
                    warn!(channel = parent.id(), error = %err, backoff, "accept failed; retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
                _ = shutdown.changed() => return stopped(),
            }
            backoff *= 2;
        }
    }
}

#[async_trait]
impl UnsafeClose for NetServerChannel {
    async fn unsafe_close(&self) -> Result<(), ChannelError> {
        self.shutdown.send_replace(true);
        let listener = self.listener.lock().await.take();
        if listener.is_some() {
            debug!(local = ?self.local_addr(), "tcp listener closed");
        }
        Ok(())
    }
}

impl Transport for NetServerChannel {
    fn name(&self) -> &'static str {
        "tcp-server"
    }

    fn binder(&self) -> Option<&dyn UnsafeBind> {
        Some(self)
    }

    fn acceptor(&self) -> Option<&dyn UnsafeAccept> {
        Some(self)
    }

    fn closer(&self) -> Option<&dyn UnsafeClose> {
        Some(self)
    }
}
