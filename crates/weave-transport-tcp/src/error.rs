use std::{io, sync::Arc};

use tracing::debug;
use weave_core::ChannelError;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "weave.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "weave.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "weave.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "weave.transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "weave.transport.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: "weave.transport.tcp.shutdown_failed",
    message: "tcp shutdown",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "weave.transport.tcp.configure_failed",
    message: "tcp configure",
};

/// 将 IO 错误映射为通道错误。
///
/// - 超时与 `WouldBlock` 映射为瞬时的 [`ChannelError::Timeout`]，不会使通道失活；
/// - `UnexpectedEof` 映射为 [`ChannelError::Eof`]；
/// - 读路径上的其余错误映射为 [`ChannelError::ReadError`]，其它路径保留原始 IO 错误并附带操作文案。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> ChannelError {
    debug!(code = kind.code, %error, "{} failed", kind.message);
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ChannelError::Timeout(kind.message),
        io::ErrorKind::UnexpectedEof => ChannelError::Eof,
        _ if kind.code == READ.code => ChannelError::ReadError(format!("{}: {error}", kind.message)),
        other => ChannelError::Io(Arc::new(io::Error::new(
            other,
            format!("{}: {error}", kind.message),
        ))),
    }
}

/// 构造超时错误。
pub(crate) fn timeout_error(kind: OperationKind) -> ChannelError {
    debug!(code = kind.code, "{} timed out", kind.message);
    ChannelError::Timeout(kind.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_transient() {
        let error = map_io_error(WRITE, io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(error, ChannelError::Timeout("tcp write")));
        assert!(error.is_transient(), "超时不应使通道失活");
    }

    #[test]
    fn read_failures_keep_their_context() {
        let error = map_io_error(READ, io::Error::from(io::ErrorKind::ConnectionReset));
        match error {
            ChannelError::ReadError(message) => assert!(message.starts_with("tcp read: ")),
            other => panic!("读错误应映射为 ReadError，实际为 {other:?}"),
        }
    }

    #[test]
    fn other_failures_preserve_io_kind() {
        let error = map_io_error(BIND, io::Error::from(io::ErrorKind::AddrInUse));
        match error {
            ChannelError::Io(inner) => {
                assert_eq!(inner.kind(), io::ErrorKind::AddrInUse);
                assert!(inner.to_string().starts_with("tcp bind: "));
            }
            other => panic!("绑定错误应保留 IO 分类，实际为 {other:?}"),
        }
        assert!(matches!(
            map_io_error(READ, io::Error::from(io::ErrorKind::UnexpectedEof)),
            ChannelError::Eof
        ));
    }
}
