use std::time::Duration;

use weave_core::{Params, params::keys};

/// 从通道参数解析出的套接字配置。
///
/// # 教案式说明
/// - **意图（Why）**：传输在构造时读取一次参数，避免读写热路径上反复查询 `DashMap`。
/// - **契约（What）**：缺省值与 [`keys`] 中的文档一致；`READ_BUFFER_SIZE` 为 0 时回退到默认值。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSocketConfig {
    pub nodelay: bool,
    pub linger: Option<Duration>,
    pub read_buffer_size: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub auto_read: bool,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            linger: None,
            read_buffer_size: keys::DEFAULT_READ_BUFFER_SIZE,
            read_timeout: None,
            write_timeout: None,
            auto_read: true,
        }
    }
}

impl TcpSocketConfig {
    pub fn from_params(params: &Params) -> Self {
        let defaults = Self::default();
        let read_buffer_size = match params.usize_or(keys::READ_BUFFER_SIZE, 0) {
            0 => defaults.read_buffer_size,
            size => size,
        };
        Self {
            nodelay: params.bool_or(keys::TCP_NODELAY, defaults.nodelay),
            linger: params.duration(keys::SO_LINGER),
            read_buffer_size,
            read_timeout: params.duration(keys::READ_TIMEOUT),
            write_timeout: params.duration(keys::WRITE_TIMEOUT),
            auto_read: params.bool_or(keys::AUTO_READ, defaults.auto_read),
        }
    }
}
