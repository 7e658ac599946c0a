//! 传输能力契约。
//!
//! # 教案式说明
//! - **意图（Why）**：内核不关心底层是 TCP、UDP 还是内存管道；传输实现只需声明自己支持哪些操作。
//! - **逻辑（How）**：每种操作是一个窄 trait；[`Transport`] 通过一组返回 `Option<&dyn _>` 的访问器暴露
//!   能力，默认全部为 `None`。执行器在调度时查询访问器，而不是做运行时类型判断。
//! - **契约（What）**：
//!   - 缺少读能力时 `read` 为空操作；缺少写/绑定/连接能力时对应 Future 以
//!     [`ChannelError::Unsupported`] 失败；缺少关闭/断开能力时只做状态迁移；
//!   - 没有 [`AutoRead`] 能力的通道每次 `read` 只读一轮。

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;

use crate::{Message, channel::Channel, error::ChannelError, future::ChannelFuture};

/// 读一条消息。
#[async_trait]
pub trait UnsafeRead: Send + Sync {
    /// 返回 `Ok(None)` 表示本轮无消息；`Err(Skip)` 表示截止时间到期且无数据。
    async fn unsafe_read(&self) -> Result<Option<Message>, ChannelError>;
}

/// 写一条消息。
#[async_trait]
pub trait UnsafeWrite: Send + Sync {
    /// 写入整条消息，无法识别的负载类型返回 [`ChannelError::UnknownObjectType`]。
    async fn unsafe_write(&self, message: Message) -> Result<(), ChannelError>;
}

/// 绑定本地地址。
#[async_trait]
pub trait UnsafeBind: Send + Sync {
    /// 绑定到 `addr`。
    async fn unsafe_bind(&self, addr: SocketAddr) -> Result<(), ChannelError>;
}

/// 关闭底层资源。
#[async_trait]
pub trait UnsafeClose: Send + Sync {
    /// 关闭连接或监听器；错误只会被记录。
    async fn unsafe_close(&self) -> Result<(), ChannelError>;
}

/// 建立连接。
#[async_trait]
pub trait UnsafeConnect: Send + Sync {
    /// 连接到 `remote`，可选地先绑定 `local`。
    async fn unsafe_connect(
        &self,
        local: Option<SocketAddr>,
        remote: SocketAddr,
    ) -> Result<(), ChannelError>;
}

/// 断开连接。
#[async_trait]
pub trait UnsafeDisconnect: Send + Sync {
    /// 断开；错误只会被记录。
    async fn unsafe_disconnect(&self) -> Result<(), ChannelError>;
}

/// 接受一个子连接。
#[async_trait]
pub trait UnsafeAccept: Send + Sync {
    /// 返回子通道及其接受 Future；子通道为 `None` 表示监听结束或本次接受失败。
    ///
    /// 子通道应通过 [`Channel::accept_child`] 构造，以继承父通道的子参数与子 Handler。
    async fn unsafe_accept(&self, parent: &Arc<Channel>) -> (Option<Arc<Channel>>, ChannelFuture);
}

/// 自动读取开关。
pub trait AutoRead: Send + Sync {
    /// 读循环每轮结束后查询；返回 `false` 时退出循环。
    fn is_auto_read(&self) -> bool;
}

/// 具体传输实现。
pub trait Transport: Send + Sync + 'static {
    /// 用于日志的传输名称。
    fn name(&self) -> &'static str {
        "transport"
    }

    /// 读能力。
    fn reader(&self) -> Option<&dyn UnsafeRead> {
        None
    }

    /// 写能力。
    fn writer(&self) -> Option<&dyn UnsafeWrite> {
        None
    }

    /// 绑定能力。
    fn binder(&self) -> Option<&dyn UnsafeBind> {
        None
    }

    /// 关闭能力。
    fn closer(&self) -> Option<&dyn UnsafeClose> {
        None
    }

    /// 连接能力。
    fn connector(&self) -> Option<&dyn UnsafeConnect> {
        None
    }

    /// 断开能力。
    fn disconnector(&self) -> Option<&dyn UnsafeDisconnect> {
        None
    }

    /// 接受能力；绑定成功后执行器据此启动接受循环。
    fn acceptor(&self) -> Option<&dyn UnsafeAccept> {
        None
    }

    /// 自动读取能力。
    fn auto_read(&self) -> Option<&dyn AutoRead> {
        None
    }

    /// 通道激活后、`active` 事件广播前调用，用于应用套接字选项等。
    fn post_active(&self, _channel: &Arc<Channel>) {}
}
