//! 通道异步结果令牌。
//!
//! # 教案式说明
//! - **意图（Why）**：门面方法立即返回，真实 I/O 在后台任务中完成；调用方需要一个可以阻塞等待、
//!   异步等待或注册回调的完成令牌，并且无论多少个写者竞争，结果只能被确定一次。
//! - **逻辑（How）**：状态与监听器列表放在同一把 `parking_lot::Mutex` 中，状态从 `Pending` 迁移到
//!   终态的那次加锁即“赢家”；赢家释放锁后唤醒 `Condvar`（同步等待者）与 `Notify`（异步等待者），
//!   再依次执行监听器。
//! - **契约（What）**：`complete`/`fail`/`cancel` 之间先到先得，恰好一个返回 `true`；终态单调不变；
//!   [`ChannelFuture::channel`] 仅在成功后返回所属通道。

use std::{
    any::Any,
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::{channel::Channel, error::ChannelError};

/// 成功结果携带的可选值。
pub type FutureValue = Arc<dyn Any + Send + Sync>;

type Listener = Box<dyn FnOnce(&ChannelFuture) + Send>;

enum State {
    Pending,
    Success(Option<FutureValue>),
    Failed(ChannelError),
    Cancelled,
}

struct Slot {
    state: State,
    listeners: Vec<Listener>,
}

enum Affiliation {
    None,
    Weak(Weak<Channel>),
    Strong(Arc<Channel>),
}

struct Inner {
    slot: Mutex<Slot>,
    settled: Condvar,
    notify: Notify,
    channel: Affiliation,
}

/// 可克隆的完成令牌；所有克隆共享同一个结果。
#[derive(Clone)]
pub struct ChannelFuture {
    inner: Arc<Inner>,
}

impl ChannelFuture {
    /// 创建挂起的 Future，可选地关联一个通道（弱引用）。
    pub fn new(channel: Option<&Arc<Channel>>) -> Self {
        Self::with_affiliation(match channel {
            Some(channel) => Affiliation::Weak(Arc::downgrade(channel)),
            None => Affiliation::None,
        })
    }

    /// 创建不关联通道的 Future。
    pub fn detached() -> Self {
        Self::with_affiliation(Affiliation::None)
    }

    /// 创建强引用所属通道的 Future：只要 Future 还在，通道就不会被回收。
    ///
    /// 引导器返回的 Future 使用这种形式，调用方可以在完成后通过 [`ChannelFuture::channel`] 取回通道。
    /// 不要把它存进该通道自己的 Handler 中，否则会形成引用环。
    pub fn retaining(channel: &Arc<Channel>) -> Self {
        Self::with_affiliation(Affiliation::Strong(Arc::clone(channel)))
    }

    pub(crate) fn affiliated(channel: Weak<Channel>) -> Self {
        Self::with_affiliation(Affiliation::Weak(channel))
    }

    fn with_affiliation(channel: Affiliation) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    state: State::Pending,
                    listeners: Vec::new(),
                }),
                settled: Condvar::new(),
                notify: Notify::new(),
                channel,
            }),
        }
    }

    /// 创建一个已经失败的 Future。
    pub fn failed(channel: Option<&Arc<Channel>>, error: ChannelError) -> Self {
        let future = Self::new(channel);
        future.completable().fail(error);
        future
    }

    /// 创建一个已经成功的 Future。
    pub fn succeeded(channel: Option<&Arc<Channel>>) -> Self {
        let future = Self::new(channel);
        future.completable().complete();
        future
    }

    /// 返回写入视图。
    pub fn completable(&self) -> Completable {
        Completable {
            future: self.clone(),
        }
    }

    /// 是否已进入终态。
    pub fn is_done(&self) -> bool {
        !matches!(self.inner.slot.lock().state, State::Pending)
    }

    /// 是否成功完成。
    pub fn is_success(&self) -> bool {
        matches!(self.inner.slot.lock().state, State::Success(_))
    }

    /// 是否以错误结束。
    pub fn is_fail(&self) -> bool {
        matches!(self.inner.slot.lock().state, State::Failed(_))
    }

    /// 是否被取消。
    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.slot.lock().state, State::Cancelled)
    }

    /// 失败时返回错误；取消时返回 [`ChannelError::Cancelled`]。
    pub fn error(&self) -> Option<ChannelError> {
        match &self.inner.slot.lock().state {
            State::Failed(error) => Some(error.clone()),
            State::Cancelled => Some(ChannelError::Cancelled),
            _ => None,
        }
    }

    /// 成功时携带的值。
    pub fn value(&self) -> Option<FutureValue> {
        match &self.inner.slot.lock().state {
            State::Success(value) => value.clone(),
            _ => None,
        }
    }

    /// 仅在成功完成后返回所属通道。
    pub fn channel(&self) -> Option<Arc<Channel>> {
        if !self.is_success() {
            return None;
        }
        match &self.inner.channel {
            Affiliation::None => None,
            Affiliation::Weak(channel) => channel.upgrade(),
            Affiliation::Strong(channel) => Some(Arc::clone(channel)),
        }
    }

    /// 阻塞当前线程直到完成。
    ///
    /// 不要在 tokio 工作线程上调用；异步上下文请使用 [`ChannelFuture::wait`]。
    pub fn sync(&self) -> &Self {
        let mut slot = self.inner.slot.lock();
        while matches!(slot.state, State::Pending) {
            self.inner.settled.wait(&mut slot);
        }
        self
    }

    /// 带超时的阻塞等待，返回是否已完成。
    pub fn sync_timeout(&self, timeout: Duration) -> bool {
        let mut slot = self.inner.slot.lock();
        if matches!(slot.state, State::Pending) {
            let _ = self
                .inner
                .settled
                .wait_while_for(&mut slot, |slot| matches!(slot.state, State::Pending), timeout);
        }
        !matches!(slot.state, State::Pending)
    }

    /// 异步等待完成。
    pub async fn wait(&self) -> &Self {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // 先登记再检查，避免错过检查与等待之间的唤醒。
            notified.as_mut().enable();
            if self.is_done() {
                return self;
            }
            notified.await;
        }
    }

    /// 注册完成回调；已完成时立即在当前线程执行。每个回调恰好执行一次。
    pub fn add_listener<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&ChannelFuture) + Send + 'static,
    {
        {
            let mut slot = self.inner.slot.lock();
            if matches!(slot.state, State::Pending) {
                slot.listeners.push(Box::new(listener));
                return self;
            }
        }
        listener(self);
        self
    }

    /// 完成时把同样的结果写入 `target`。
    pub fn propagate_to(&self, target: &ChannelFuture) -> &Self {
        let target = target.clone();
        self.add_listener(move |done| {
            let next = match &done.inner.slot.lock().state {
                State::Pending => return,
                State::Success(value) => State::Success(value.clone()),
                State::Failed(error) => State::Failed(error.clone()),
                State::Cancelled => State::Cancelled,
            };
            target.settle(next);
        })
    }

    /// 两个句柄是否指向同一个 Future。
    pub fn ptr_eq(&self, other: &ChannelFuture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn settle(&self, next: State) -> bool {
        let listeners = {
            let mut slot = self.inner.slot.lock();
            if !matches!(slot.state, State::Pending) {
                return false;
            }
            slot.state = next;
            std::mem::take(&mut slot.listeners)
        };
        self.inner.settled.notify_all();
        self.inner.notify.notify_waiters();
        for listener in listeners {
            listener(self);
        }
        true
    }
}

impl fmt::Debug for ChannelFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.slot.lock().state {
            State::Pending => "pending",
            State::Success(_) => "success",
            State::Failed(_) => "failed",
            State::Cancelled => "cancelled",
        };
        f.debug_struct("ChannelFuture").field("state", &state).finish()
    }
}

/// Future 的写入视图：先到先得，恰好一次成功。
pub struct Completable {
    future: ChannelFuture,
}

impl Completable {
    /// 以无值成功完成。
    pub fn complete(&self) -> bool {
        self.future.settle(State::Success(None))
    }

    /// 以携带值成功完成。
    pub fn complete_with(&self, value: FutureValue) -> bool {
        self.future.settle(State::Success(Some(value)))
    }

    /// 以错误结束。
    pub fn fail(&self, error: ChannelError) -> bool {
        self.future.settle(State::Failed(error))
    }

    /// 取消。
    pub fn cancel(&self) -> bool {
        self.future.settle(State::Cancelled)
    }
}
