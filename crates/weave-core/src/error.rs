//! 通道错误分类。
//!
//! # 教案式说明
//! - **意图（Why）**：应用只能通过 [`ChannelFuture`](crate::ChannelFuture) 的状态或到达终端 Handler 的
//!   `error_caught` 观察失败，因此错误值需要可克隆、可跨线程传递，并能区分“瞬时”与“致命”两类。
//! - **逻辑（How）**：使用 `thiserror` 描述哨兵错误；I/O 错误以 `Arc` 包装以满足 `Clone`。
//! - **契约（What）**：[`ChannelError::is_transient`] 为 `true` 的错误不会使通道失活。

use std::{io, sync::Arc};

use thiserror::Error;

/// 框架统一结果类型。
pub type Result<T, E = ChannelError> = std::result::Result<T, E>;

/// 通道层错误。
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// 在非活跃通道上尝试执行操作。
    #[error("channel is not active")]
    NotActive,
    /// 必需的对象或连接缺失。
    #[error("required object is missing")]
    NilObject,
    /// 写入负载类型无法被传输层识别。
    #[error("unknown object type for {0}")]
    UnknownObjectType(&'static str),
    /// 非 EOF、非超时的读取失败。
    #[error("read error: {0}")]
    ReadError(String),
    /// 本轮没有数据；只在读循环内部消费，不会交给应用 Handler。
    #[error("no data this pass")]
    Skip,
    /// 对端关闭了连接。
    #[error("end of stream")]
    Eof,
    /// 传输层截止时间到期。
    #[error("{0} timed out")]
    Timeout(&'static str),
    /// 底层 I/O 错误。
    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),
    /// Handler 回调发生 panic，被上下文边界捕获。
    #[error("handler `{handler}` panicked: {message}")]
    Caught {
        /// 发生 panic 的上下文名称。
        handler: String,
        /// panic 负载的文本描述。
        message: String,
    },
    /// 读事件抵达 tail 仍未被任何 Handler 消费。
    #[error("read reached the tail of the pipeline unhandled")]
    UnhandledRead,
    /// 传输层未实现对应能力。
    #[error("transport does not support {0}")]
    Unsupported(&'static str),
    /// 操作被取消。
    #[error("operation cancelled")]
    Cancelled,
    /// 引导器缺少必需配置。
    #[error("bootstrap misconfigured: {0}")]
    Misconfigured(&'static str),
    /// 参数解析失败。
    #[error("invalid configuration: {0}")]
    Config(String),
    /// 解码失败。
    #[error("decode failed: {0}")]
    Decode(String),
    /// 帧长度超过上限。
    #[error("frame length {length} exceeds limit {limit}")]
    FrameTooLong {
        /// 观测到的长度。
        length: usize,
        /// 允许的上限。
        limit: usize,
    },
}

impl ChannelError {
    /// 判断错误是否为瞬时错误（不会使通道失活）。
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Skip | ChannelError::Timeout(_))
    }
}

impl From<io::Error> for ChannelError {
    fn from(error: io::Error) -> Self {
        ChannelError::Io(Arc::new(error))
    }
}
