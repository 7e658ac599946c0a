use std::{future::Future, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use socket2::SockRef;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex as AsyncMutex, watch},
};
use tracing::{debug, warn};
use weave_core::{
    ChannelError, Message,
    transport::{AutoRead, UnsafeClose, UnsafeDisconnect, UnsafeRead, UnsafeWrite},
};

use crate::{
    config::TcpSocketConfig,
    error::{self, map_io_error, timeout_error},
};

/// 单条 TCP 连接的读写状态。
///
/// # 教案式说明
/// - **意图（Why）**：读循环与写排水在不同任务中并行运行，二者不能互相阻塞。
/// - **逻辑（How）**：`TcpStream` 拆成读写两半，各自由 `tokio::sync::Mutex` 保护；关闭时先通过
///   `watch` 通知正在等待数据的读任务退出，再取走两半并关闭写方向。
/// - **契约（What）**：未建立连接或已关闭时读写返回 [`ChannelError::NotActive`]；读截止到期返回
///   [`ChannelError::Skip`]；对端关闭返回 [`ChannelError::Eof`]。
pub(crate) struct Connection {
    reader: AsyncMutex<Option<OwnedReadHalf>>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    addrs: Mutex<Option<(SocketAddr, SocketAddr)>>,
    closed: watch::Sender<bool>,
    config: TcpSocketConfig,
}

impl Connection {
    pub(crate) fn new(config: TcpSocketConfig) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            reader: AsyncMutex::new(None),
            writer: AsyncMutex::new(None),
            addrs: Mutex::new(None),
            closed,
            config,
        }
    }

    /// 装入一条已建立的连接。
    pub(crate) async fn attach(&self, stream: TcpStream) -> Result<(), ChannelError> {
        let local = stream
            .local_addr()
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let peer = stream
            .peer_addr()
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);
        *self.addrs.lock() = Some((local, peer));
        self.closed.send_replace(false);
        Ok(())
    }

    /// 同步版本的 [`Connection::attach`]，用于刚接受、尚无人竞争的连接。
    pub(crate) fn attached(stream: TcpStream, config: TcpSocketConfig) -> Result<Self, ChannelError> {
        let local = stream
            .local_addr()
            .map_err(|err| map_io_error(error::ACCEPT, err))?;
        let peer = stream
            .peer_addr()
            .map_err(|err| map_io_error(error::ACCEPT, err))?;
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Ok(Self {
            reader: AsyncMutex::new(Some(read_half)),
            writer: AsyncMutex::new(Some(write_half)),
            addrs: Mutex::new(Some((local, peer))),
            closed,
            config,
        })
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.addrs.lock().map(|(local, _)| local)
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.addrs.lock().map(|(_, peer)| peer)
    }

    /// 按配置设置 `TCP_NODELAY` 与 `SO_LINGER`。写半部正被占用时跳过。
    pub(crate) fn apply_socket_options(&self) {
        let Ok(guard) = self.writer.try_lock() else {
            debug!("writer busy; socket options not applied");
            return;
        };
        let Some(half) = guard.as_ref() else {
            return;
        };
        let stream: &TcpStream = half.as_ref();
        if let Err(err) = stream.set_nodelay(self.config.nodelay) {
            warn!(error = %map_io_error(error::CONFIGURE, err), "failed to set TCP_NODELAY");
        }
        if let Some(linger) = self.config.linger
            && let Err(err) = SockRef::from(stream).set_linger(Some(linger))
        {
            warn!(error = %map_io_error(error::CONFIGURE, err), "failed to set SO_LINGER");
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        self.closed.send_replace(true);
        let reader = self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();
        drop(reader);
        match writer {
            Some(mut half) => half
                .shutdown()
                .await
                .map_err(|err| map_io_error(error::SHUTDOWN, err)),
            None => Ok(()),
        }
    }
}

async fn within<F: Future>(limit: Option<Duration>, operation: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, operation).await.ok(),
        None => Some(operation.await),
    }
}

/// 把出站消息转换为字节。
pub(crate) fn into_bytes(message: Message) -> Result<Bytes, ChannelError> {
    let message = match message.downcast::<Bytes>() {
        Ok(bytes) => return Ok(*bytes),
        Err(message) => message,
    };
    let message = match message.downcast::<BytesMut>() {
        Ok(bytes) => return Ok(bytes.freeze()),
        Err(message) => message,
    };
    let message = match message.downcast::<Vec<u8>>() {
        Ok(bytes) => return Ok(Bytes::from(*bytes)),
        Err(message) => message,
    };
    let message = match message.downcast::<String>() {
        Ok(text) => return Ok(Bytes::from(*text)),
        Err(message) => message,
    };
    match message.downcast::<&'static str>() {
        Ok(text) => Ok(Bytes::from_static(text.as_bytes())),
        Err(_) => Err(ChannelError::UnknownObjectType("tcp write")),
    }
}

#[async_trait]
impl UnsafeRead for Connection {
    async fn unsafe_read(&self) -> Result<Option<Message>, ChannelError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ChannelError::Eof);
        }
        let mut guard = self.reader.lock().await;
        let Some(half) = guard.as_mut() else {
            return Err(ChannelError::NotActive);
        };
        let mut buffer = BytesMut::with_capacity(self.config.read_buffer_size);
        let outcome = tokio::select! {
            outcome = within(self.config.read_timeout, half.read_buf(&mut buffer)) => outcome,
            _ = closed.changed() => return Err(ChannelError::Eof),
        };
        match outcome {
            None => Err(ChannelError::Skip),
            Some(Ok(0)) => Err(ChannelError::Eof),
            Some(Ok(_)) => Ok(Some(Box::new(buffer.freeze()))),
            Some(Err(err)) => Err(map_io_error(error::READ, err)),
        }
    }
}

#[async_trait]
impl UnsafeWrite for Connection {
    async fn unsafe_write(&self, message: Message) -> Result<(), ChannelError> {
        let bytes = into_bytes(message)?;
        let mut guard = self.writer.lock().await;
        let Some(half) = guard.as_mut() else {
            return Err(ChannelError::NotActive);
        };
        match within(self.config.write_timeout, half.write_all(&bytes)).await {
            None => Err(timeout_error(error::WRITE)),
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => Err(map_io_error(error::WRITE, err)),
        }
    }
}

#[async_trait]
impl UnsafeClose for Connection {
    async fn unsafe_close(&self) -> Result<(), ChannelError> {
        self.shutdown().await
    }
}

#[async_trait]
impl UnsafeDisconnect for Connection {
    async fn unsafe_disconnect(&self) -> Result<(), ChannelError> {
        self.shutdown().await
    }
}

impl AutoRead for Connection {
    fn is_auto_read(&self) -> bool {
        self.config.auto_read
    }
}
