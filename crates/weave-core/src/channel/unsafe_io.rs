//! 通道执行器：在单飞保护下执行真实传输操作。
//!
//! # 教案式说明
//! - **意图（Why）**：流水线的出站操作最终都要落到传输上；同一通道上同类操作不能重叠执行（例如两次
//!   并发 bind），而不同类操作（读与写）应当可以并行。
//! - **逻辑（How）**：六类操作各有一个 `AtomicBool` 标志，`compare_exchange(false, true)` 成功者派生一个
//!   tokio 任务执行操作，失败者直接返回。写入额外维护 FIFO 队列：每个排水任务只写一条，释放标志后若
//!   队列仍非空则重新触发，保证顺序且不会形成长时间占用的循环。
//! - **契约（What）**：
//!   - bind/connect 缺少地址时同步取消 Future；
//!   - bind/connect/write 的传输错误记录为 `warn!` 并取消 Future；bind/connect 错误与非瞬时写错误同时
//!     使通道失活；
//!   - close/disconnect 的传输错误只记录，Future 总是成功完成，随后释放通道；
//!   - 单飞竞争的失败者不调度任何工作，也不会完成自己的 Future，只有写入通过队列兜底。

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{Message, error::ChannelError, future::ChannelFuture};

use super::Channel;

/// 单飞标志：idle ⇄ running。
struct OpFlag(AtomicBool);

impl OpFlag {
    const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct PendingWrite {
    message: Message,
    future: ChannelFuture,
}

/// 通道的底层执行器。
pub struct ChannelUnsafe {
    channel: Weak<Channel>,
    read: OpFlag,
    write: OpFlag,
    bind: OpFlag,
    close: OpFlag,
    connect: OpFlag,
    disconnect: OpFlag,
    write_queue: Mutex<VecDeque<PendingWrite>>,
}

impl ChannelUnsafe {
    pub(crate) fn new(channel: Weak<Channel>) -> Self {
        Self {
            channel,
            read: OpFlag::new(),
            write: OpFlag::new(),
            bind: OpFlag::new(),
            close: OpFlag::new(),
            connect: OpFlag::new(),
            disconnect: OpFlag::new(),
            write_queue: Mutex::new(VecDeque::new()),
        }
    }

    /// 排队等待写出的消息数。
    pub fn pending_writes(&self) -> usize {
        self.write_queue.lock().len()
    }

    /// 读循环是否在运行。
    pub fn is_reading(&self) -> bool {
        self.read.is_running()
    }

    /// 绑定（以及随后的接受循环）是否在运行。
    pub fn is_binding(&self) -> bool {
        self.bind.is_running()
    }

    /// 绑定本地地址；传输支持接受时，成功后在同一任务中运行接受循环，期间绑定标志保持占用。
    pub fn bind(&self, addr: Option<SocketAddr>, future: ChannelFuture) {
        let Some(addr) = addr else {
            future.completable().cancel();
            return;
        };
        let Some(channel) = self.channel.upgrade() else {
            future.completable().fail(ChannelError::NilObject);
            return;
        };
        if !self.bind.try_acquire() {
            debug!(channel = channel.id(), "bind already in flight");
            return;
        }
        let runtime = channel.runtime().clone();
        runtime.spawn(async move {
            let outcome = match channel.transport().binder() {
                Some(binder) => binder.unsafe_bind(addr).await,
                None => Err(ChannelError::Unsupported("bind")),
            };
            match outcome {
                Err(error) => {
                    warn!(channel = channel.id(), %addr, %error, "bind failed");
                    channel.inactive_channel();
                    future.completable().cancel();
                }
                Ok(()) => {
                    debug!(channel = channel.id(), %addr, "bound");
                    channel.active_channel();
                    future.completable().complete();
                    accept_loop(&channel).await;
                }
            }
            channel.unsafe_io().bind.release();
        });
    }

    /// 连接远端。
    pub fn connect(
        &self,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
        future: ChannelFuture,
    ) {
        let Some(remote) = remote else {
            future.completable().cancel();
            return;
        };
        let Some(channel) = self.channel.upgrade() else {
            future.completable().fail(ChannelError::NilObject);
            return;
        };
        if !self.connect.try_acquire() {
            debug!(channel = channel.id(), "connect already in flight");
            return;
        }
        let runtime = channel.runtime().clone();
        runtime.spawn(async move {
            let outcome = match channel.transport().connector() {
                Some(connector) => connector.unsafe_connect(local, remote).await,
                None => Err(ChannelError::Unsupported("connect")),
            };
            match outcome {
                Err(error) => {
                    warn!(channel = channel.id(), %remote, %error, "connect failed");
                    channel.inactive_channel();
                    future.completable().cancel();
                }
                Ok(()) => {
                    debug!(channel = channel.id(), %remote, "connected");
                    channel.active_channel();
                    future.completable().complete();
                }
            }
            channel.unsafe_io().connect.release();
        });
    }

    /// 关闭通道；已经关闭过时直接完成调用方的 Future。
    pub fn close(&self, future: ChannelFuture) {
        let Some(channel) = self.channel.upgrade() else {
            future.completable().complete();
            return;
        };
        if channel.close_future().is_done() {
            future.completable().complete();
            return;
        }
        if !self.close.try_acquire() {
            debug!(channel = channel.id(), "close already in flight");
            return;
        }
        let runtime = channel.runtime().clone();
        runtime.spawn(async move {
            channel.inactive_channel();
            if let Some(closer) = channel.transport().closer()
                && let Err(error) = closer.unsafe_close().await
            {
                warn!(channel = channel.id(), %error, "close failed");
            }
            let dropped = channel.unsafe_io().cancel_pending_writes();
            debug!(channel = channel.id(), dropped, "closed");
            channel.release();
            channel.close_future().completable().complete();
            future.completable().complete();
            channel.unsafe_io().close.release();
        });
    }

    /// 断开连接并释放通道资源。
    pub fn disconnect(&self, future: ChannelFuture) {
        let Some(channel) = self.channel.upgrade() else {
            future.completable().complete();
            return;
        };
        if !self.disconnect.try_acquire() {
            debug!(channel = channel.id(), "disconnect already in flight");
            return;
        }
        let runtime = channel.runtime().clone();
        runtime.spawn(async move {
            channel.inactive_channel();
            if let Some(disconnector) = channel.transport().disconnector()
                && let Err(error) = disconnector.unsafe_disconnect().await
            {
                warn!(channel = channel.id(), %error, "disconnect failed");
            }
            channel.release();
            future.completable().complete();
            if let Some(disconnected) = channel.disconnect_future() {
                disconnected.completable().complete();
            }
            channel.unsafe_io().disconnect.release();
        });
    }

    /// 启动读循环。需要读能力、赢得单飞竞争且通道活跃。
    pub fn read(&self) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        if channel.transport().reader().is_none() {
            debug!(channel = channel.id(), "transport cannot read; read ignored");
            return;
        }
        if !self.read.try_acquire() {
            return;
        }
        if !channel.is_active() {
            self.read.release();
            return;
        }
        let runtime = channel.runtime().clone();
        runtime.spawn(async move {
            read_loop(&channel).await;
            channel.unsafe_io().read.release();
        });
    }

    /// 写入：活跃时入队并尝试启动排水；`None` 或通道非活跃时立即完成 Future。
    pub fn write(&self, message: Option<Message>, future: ChannelFuture) {
        let Some(channel) = self.channel.upgrade() else {
            future.completable().fail(ChannelError::NilObject);
            return;
        };
        let active = channel.is_active();
        match message {
            Some(message) if active => {
                self.write_queue
                    .lock()
                    .push_back(PendingWrite { message, future });
            }
            _ => {
                future.completable().complete();
            }
        }
        if !active || !self.write.try_acquire() {
            return;
        }
        let runtime = channel.runtime().clone();
        runtime.spawn(async move {
            channel.unsafe_io().drain_one(&channel).await;
        });
    }

    async fn drain_one(&self, channel: &Arc<Channel>) {
        let next = self.write_queue.lock().pop_front();
        let Some(PendingWrite { message, future }) = next else {
            self.finish_drain(channel);
            return;
        };
        let outcome = match channel.transport().writer() {
            Some(writer) => writer.unsafe_write(message).await,
            None => Err(ChannelError::Unsupported("write")),
        };
        match outcome {
            Ok(()) => {
                future.completable().complete();
            }
            Err(error) => {
                warn!(channel = channel.id(), %error, "write failed");
                if !error.is_transient() {
                    channel.inactive_channel();
                }
                future.completable().cancel();
            }
        }
        self.finish_drain(channel);
    }

    /// 释放写标志后重新检查队列：释放前入队、又没抢到标志的写者不会被遗留。
    fn finish_drain(&self, channel: &Arc<Channel>) {
        self.write.release();
        if !self.write_queue.lock().is_empty() {
            self.write(None, ChannelFuture::new(Some(channel)));
        }
    }

    /// 取消所有排队中的写入，返回被取消的数量。
    pub(crate) fn cancel_pending_writes(&self) -> usize {
        let drained: Vec<PendingWrite> = self.write_queue.lock().drain(..).collect();
        let count = drained.len();
        for pending in drained {
            pending.future.completable().cancel();
        }
        count
    }
}

async fn accept_loop(channel: &Arc<Channel>) {
    let Some(acceptor) = channel.transport().acceptor() else {
        return;
    };
    while channel.is_active() {
        let (child, accepted) = acceptor.unsafe_accept(channel).await;
        match child {
            Some(child) => {
                debug!(parent = channel.id(), child = child.id(), "accepted");
                channel.adopt_child(&child);
                child.pipeline().fire_registered();
                child.active_channel();
                accepted.completable().complete();
            }
            None => {
                accepted.completable().cancel();
                if !channel.is_active() {
                    break;
                }
                warn!(channel = channel.id(), "accept produced no child while still active");
                tokio::task::yield_now().await;
            }
        }
    }
    debug!(channel = channel.id(), "accept loop stopped");
}

async fn read_loop(channel: &Arc<Channel>) {
    let Some(reader) = channel.transport().reader() else {
        return;
    };
    let mut completion_pending = false;
    loop {
        match reader.unsafe_read().await {
            Ok(Some(message)) => {
                channel.pipeline().fire_read(message);
                completion_pending = true;
            }
            Ok(None) => tokio::task::yield_now().await,
            Err(ChannelError::Skip) => {
                if completion_pending {
                    channel.pipeline().fire_read_completed();
                    completion_pending = false;
                }
                tokio::task::yield_now().await;
            }
            Err(error) => {
                if error.is_transient() {
                    debug!(channel = channel.id(), %error, "read stopped");
                } else {
                    if matches!(error, ChannelError::Eof) {
                        debug!(channel = channel.id(), "peer closed");
                    } else {
                        warn!(channel = channel.id(), %error, "read failed");
                    }
                    channel.inactive_channel();
                }
                break;
            }
        }
        if !channel.is_auto_read() || !channel.is_active() {
            break;
        }
    }
    if completion_pending {
        channel.pipeline().fire_read_completed();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::runtime::Handle;

    use super::*;
    use crate::{
        params::Params,
        transport::{Transport, UnsafeWrite},
    };

    /// 只记录写入内容的传输。
    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl UnsafeWrite for Recording {
        async fn unsafe_write(&self, message: Message) -> Result<(), ChannelError> {
            let text = message
                .downcast::<String>()
                .map_err(|_| ChannelError::UnknownObjectType("recording"))?;
            self.0.lock().push(*text);
            Ok(())
        }
    }

    impl Transport for Recording {
        fn writer(&self) -> Option<&dyn UnsafeWrite> {
            Some(self)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn write_queued_while_the_drain_finishes_is_not_stranded() {
        let transport = Arc::new(Recording::default());
        let channel = Channel::client(transport.clone(), Params::new(), Handle::current());
        channel.active_channel();
        let io = channel.unsafe_io();

        // 排水任务仍持有标志、刚取到空队列：此时到达的写者只能入队。
        assert!(io.write.try_acquire());
        let late = ChannelFuture::new(Some(&channel));
        io.write(Some(Box::new("late".to_owned())), late.clone());
        assert_eq!(io.pending_writes(), 1, "标志被占用时写入只入队");

        io.finish_drain(&channel);
        tokio::time::timeout(Duration::from_secs(2), late.wait())
            .await
            .expect("排水结束后应重新检查队列并写出遗留消息");
        assert!(late.is_success());
        assert_eq!(*transport.0.lock(), vec!["late".to_owned()]);
        assert_eq!(io.pending_writes(), 0);
    }
}
