//! tracing 订阅器安装。
//!
//! # 教案式说明
//! - **意图（Why）**：内核只通过 `tracing` 宏输出事件，宿主进程决定是否以及如何收集；这里给出一个
//!   “一行安装”的默认方案，供示例程序与小型服务使用。
//! - **逻辑（How）**：`EnvFilter` 优先读取 `RUST_LOG`，缺省为 `info`；与 `fmt` 层组合后设为全局订阅器。
//! - **契约（What）**：全局订阅器只能设置一次；已存在时返回 [`ObservabilityError::SubscriberAlreadySet`]。

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 安装订阅器时的错误。
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// 进程中已经存在全局订阅器。
    #[error("全局 tracing Subscriber 已存在，无法覆盖")]
    SubscriberAlreadySet,
    /// 设置全局订阅器失败。
    #[error("设置 tracing 全局 Subscriber 失败: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装 `fmt + EnvFilter` 全局订阅器。
pub fn install_subscriber() -> Result<(), ObservabilityError> {
    if dispatcher::has_been_set() {
        return Err(ObservabilityError::SubscriberAlreadySet);
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
