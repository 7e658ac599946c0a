use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use tokio::net::{TcpSocket, TcpStream};
use tracing::debug;
use weave_core::{
    Channel, ChannelError, Params, Transport,
    transport::{AutoRead, UnsafeClose, UnsafeConnect, UnsafeDisconnect, UnsafeRead, UnsafeWrite},
};

use crate::{
    config::TcpSocketConfig,
    connection::Connection,
    error::{self, map_io_error},
};

/// 已建立连接上的 TCP 传输，服务端接受的子通道使用它。
///
/// # 教案式说明
/// - **意图（Why）**：被接受的连接一出生就处于已连接状态，只需要读、写、关闭与断开能力。
/// - **逻辑（How）**：能力访问器全部指向内部 [`Connection`]；`post_active` 在通道激活时应用套接字选项。
/// - **契约（What）**：读到的消息类型为 [`bytes::Bytes`]；写入接受 `Bytes`、`BytesMut`、`Vec<u8>`、
///   `String` 与 `&'static str`。
pub struct NetChannel {
    connection: Connection,
}

impl NetChannel {
    /// 包装一条已建立的连接。
    pub fn from_stream(stream: TcpStream, config: TcpSocketConfig) -> Result<Self, ChannelError> {
        Ok(Self {
            connection: Connection::attached(stream, config)?,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.local_addr()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.connection.peer_addr()
    }
}

impl Transport for NetChannel {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn reader(&self) -> Option<&dyn UnsafeRead> {
        Some(&self.connection)
    }

    fn writer(&self) -> Option<&dyn UnsafeWrite> {
        Some(&self.connection)
    }

    fn closer(&self) -> Option<&dyn UnsafeClose> {
        Some(&self.connection)
    }

    fn disconnector(&self) -> Option<&dyn UnsafeDisconnect> {
        Some(&self.connection)
    }

    fn auto_read(&self) -> Option<&dyn AutoRead> {
        Some(&self.connection)
    }

    fn post_active(&self, channel: &Arc<Channel>) {
        debug!(channel = channel.id(), peer = ?self.peer_addr(), "tcp channel active");
        self.connection.apply_socket_options();
    }
}

/// 主动发起连接的 TCP 传输。
pub struct NetClientChannel {
    connection: Connection,
}

impl NetClientChannel {
    pub fn new(config: TcpSocketConfig) -> Self {
        Self {
            connection: Connection::new(config),
        }
    }

    /// 供 [`Bootstrap::channel_type`](weave_core::Bootstrap::channel_type) 使用的工厂。
    pub fn factory()
    -> impl Fn(&Params) -> Result<Arc<dyn Transport>, ChannelError> + Send + Sync + 'static {
        |params: &Params| -> Result<Arc<dyn Transport>, ChannelError> {
            Ok(Arc::new(Self::new(TcpSocketConfig::from_params(params))))
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.local_addr()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.connection.peer_addr()
    }
}

async fn dial(local: Option<SocketAddr>, remote: SocketAddr) -> io::Result<TcpStream> {
    let Some(local) = local else {
        return TcpStream::connect(remote).await;
    };
    let socket = if remote.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.bind(local)?;
    socket.connect(remote).await
}

#[async_trait]
impl UnsafeConnect for NetClientChannel {
    async fn unsafe_connect(
        &self,
        local: Option<SocketAddr>,
        remote: SocketAddr,
    ) -> Result<(), ChannelError> {
        let stream = dial(local, remote)
            .await
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        self.connection.attach(stream).await
    }
}

impl Transport for NetClientChannel {
    fn name(&self) -> &'static str {
        "tcp-client"
    }

    fn reader(&self) -> Option<&dyn UnsafeRead> {
        Some(&self.connection)
    }

    fn writer(&self) -> Option<&dyn UnsafeWrite> {
        Some(&self.connection)
    }

    fn closer(&self) -> Option<&dyn UnsafeClose> {
        Some(&self.connection)
    }

    fn connector(&self) -> Option<&dyn UnsafeConnect> {
        Some(self)
    }

    fn disconnector(&self) -> Option<&dyn UnsafeDisconnect> {
        Some(&self.connection)
    }

    fn auto_read(&self) -> Option<&dyn AutoRead> {
        Some(&self.connection)
    }

    fn post_active(&self, channel: &Arc<Channel>) {
        debug!(channel = channel.id(), peer = ?self.peer_addr(), "tcp client active");
        self.connection.apply_socket_options();
    }
}
