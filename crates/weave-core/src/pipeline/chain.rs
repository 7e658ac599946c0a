//! 流水线链路的写时复制存储。
//!
//! # 教案式说明
//! - **意图（Why）**：事件分发与结构变更可能发生在不同任务上；若直接修改双向链表，分发中的事件可能
//!   踩到悬空链接。这里改为“读取快照、写入替换”，让竞争在结构上不可能发生。
//! - **逻辑（How）**：链路是 `Arc<Vec<Arc<ContextEntry>>>`，下标即 prev/next 关系。读取方 `load` 得到
//!   一份快照并在整次分发中持有；写入方在外层互斥锁保护下复制、修改、`commit`，并自增 epoch。
//! - **契约（What）**：下标 0 永远是 head，最后一位永远是 tail；旧快照在最后一个持有者释放后回收。

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;

use super::handler::Handler;

/// 链路节点：名称与 Handler。
pub(crate) struct ContextEntry {
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn Handler>,
}

impl ContextEntry {
    pub(crate) fn new(name: impl Into<String>, handler: Arc<dyn Handler>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            handler,
        })
    }
}

pub(crate) type Chain = Arc<Vec<Arc<ContextEntry>>>;

/// 链路快照与逻辑 epoch。
pub(crate) struct ChainBuffer {
    snapshot: ArcSwap<Vec<Arc<ContextEntry>>>,
    epoch: AtomicU64,
}

impl ChainBuffer {
    pub(crate) fn new(initial: Vec<Arc<ContextEntry>>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(initial),
            epoch: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn load(&self) -> Chain {
        self.snapshot.load_full()
    }

    /// 替换快照并返回新的 epoch。调用方必须持有变更锁。
    pub(crate) fn commit(&self, chain: Vec<Arc<ContextEntry>>) -> u64 {
        self.snapshot.store(Arc::new(chain));
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}
