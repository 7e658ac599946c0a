//! 编解码插件点。
//!
//! # 教案式说明
//! - **意图（Why）**：字节与业务消息之间的转换由协议层提供，内核只定义契约并提供把契约接入流水线的
//!   适配 Handler。
//! - **逻辑（How）**：
//!   - [`Decoder::decode`] 在数据不足时返回 [`DecodeOutcome::Incomplete`]，[`DecoderHandler`] 保留已缓冲的
//!     字节，等待下一次读入后重试，不借助 panic 展开；
//!   - [`EncoderHandler`] 只处理 `E::Item` 类型的出站消息，其余消息原样向 head 传递。
//! - **契约（What）**：解码缓冲超过 `max_frame_length` 时丢弃缓冲并以
//!   [`ChannelError::FrameTooLong`] 报告；解码错误同样丢弃缓冲，错误沿 head 方向传播。

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    Message,
    error::ChannelError,
    future::ChannelFuture,
    params::keys,
    pipeline::{Handler, HandlerContext},
};

/// 解码结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome<T> {
    /// 解出一条完整消息，已消费对应字节。
    Complete(T),
    /// 数据不足，未消费任何字节。
    Incomplete,
}

/// 字节到消息。
pub trait Decoder: Send + Sync + 'static {
    /// 解出的消息类型。
    type Item: Send + 'static;

    /// 从 `src` 头部尝试解出一条消息。
    fn decode(&self, src: &mut BytesMut) -> Result<DecodeOutcome<Self::Item>, ChannelError>;
}

/// 消息到字节。
pub trait Encoder: Send + Sync + 'static {
    /// 接受的消息类型。
    type Item: Send + 'static;

    /// 把 `item` 追加到 `dst`。
    fn encode(&self, item: Self::Item, dst: &mut BytesMut) -> Result<(), ChannelError>;
}

/// 把 [`Decoder`] 接入流水线的入站 Handler。
///
/// 缓冲属于单个通道，请通过 [`ChannelInitializer`](crate::ChannelInitializer) 为每个通道创建实例。
pub struct DecoderHandler<D> {
    decoder: D,
    buffer: Mutex<BytesMut>,
    max_frame_length: usize,
}

impl<D: Decoder> DecoderHandler<D> {
    /// 使用默认最大帧长度。
    pub fn new(decoder: D) -> Self {
        Self::with_max_frame_length(decoder, keys::DEFAULT_MAX_FRAME_LENGTH)
    }

    /// 指定最大帧长度。
    pub fn with_max_frame_length(decoder: D, max_frame_length: usize) -> Self {
        Self {
            decoder,
            buffer: Mutex::new(BytesMut::new()),
            max_frame_length,
        }
    }

    /// 当前缓冲的字节数。
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    fn decode_available(&self, incoming: &[u8]) -> (Vec<D::Item>, Option<ChannelError>) {
        let mut buffer = self.buffer.lock();
        buffer.extend_from_slice(incoming);
        let mut items = Vec::new();
        loop {
            if buffer.is_empty() {
                break;
            }
            match self.decoder.decode(&mut buffer) {
                Ok(DecodeOutcome::Complete(item)) => items.push(item),
                Ok(DecodeOutcome::Incomplete) => break,
                Err(error) => {
                    buffer.clear();
                    return (items, Some(error));
                }
            }
        }
        if buffer.len() > self.max_frame_length {
            let length = buffer.len();
            buffer.clear();
            return (
                items,
                Some(ChannelError::FrameTooLong {
                    length,
                    limit: self.max_frame_length,
                }),
            );
        }
        (items, None)
    }
}

impl<D: Decoder> Handler for DecoderHandler<D> {
    fn read(&self, ctx: &HandlerContext, message: Message) {
        let bytes = match message.downcast::<Bytes>() {
            Ok(bytes) => *bytes,
            Err(message) => match message.downcast::<BytesMut>() {
                Ok(bytes) => bytes.freeze(),
                Err(other) => {
                    ctx.fire_read(other);
                    return;
                }
            },
        };
        let (items, error) = self.decode_available(&bytes);
        for item in items {
            ctx.fire_read(Box::new(item));
        }
        if let Some(error) = error {
            ctx.fire_error_caught(error);
        }
    }

    fn removed(&self, ctx: &HandlerContext) {
        let leftover = self.buffer.lock().len();
        if leftover > 0 {
            debug!(context = ctx.name(), leftover, "decoder removed with buffered bytes");
        }
    }
}

/// 把 [`Encoder`] 接入流水线的出站 Handler。
pub struct EncoderHandler<E> {
    encoder: E,
}

impl<E: Encoder> EncoderHandler<E> {
    pub fn new(encoder: E) -> Self {
        Self { encoder }
    }
}

impl<E: Encoder> Handler for EncoderHandler<E> {
    fn write(&self, ctx: &HandlerContext, message: Message, future: ChannelFuture) {
        match message.downcast::<E::Item>() {
            Ok(item) => {
                let mut dst = BytesMut::new();
                match self.encoder.encode(*item, &mut dst) {
                    Ok(()) => ctx.write(Box::new(dst.freeze()), future),
                    Err(error) => {
                        future.completable().fail(error);
                    }
                }
            }
            Err(other) => ctx.write(other, future),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2 字节大端长度前缀的测试解码器。
    struct LengthPrefixed;

    impl Decoder for LengthPrefixed {
        type Item = Vec<u8>;

        fn decode(&self, src: &mut BytesMut) -> Result<DecodeOutcome<Vec<u8>>, ChannelError> {
            if src.len() < 2 {
                return Ok(DecodeOutcome::Incomplete);
            }
            let length = u16::from_be_bytes([src[0], src[1]]) as usize;
            if length == 0 {
                return Err(ChannelError::Decode("zero length frame".into()));
            }
            if src.len() < 2 + length {
                return Ok(DecodeOutcome::Incomplete);
            }
            let frame = src.split_to(2 + length);
            Ok(DecodeOutcome::Complete(frame[2..].to_vec()))
        }
    }

    #[test]
    fn partial_frames_are_rebuffered() {
        let handler = DecoderHandler::new(LengthPrefixed);
        let (items, error) = handler.decode_available(&[0, 3, b'a']);
        assert!(items.is_empty() && error.is_none());
        assert_eq!(handler.buffered(), 3, "不完整的帧应保留在缓冲中");

        let (items, error) = handler.decode_available(&[b'b', b'c', 0, 1, b'z', 0]);
        assert!(error.is_none());
        assert_eq!(items, vec![b"abc".to_vec(), b"z".to_vec()]);
        assert_eq!(handler.buffered(), 1);
    }

    #[test]
    fn oversized_buffer_is_discarded() {
        let handler = DecoderHandler::with_max_frame_length(LengthPrefixed, 4);
        let (_, error) = handler.decode_available(&[0, 9, 1, 2, 3, 4]);
        assert!(matches!(
            error,
            Some(ChannelError::FrameTooLong { length: 6, limit: 4 })
        ));
        assert_eq!(handler.buffered(), 0);
    }

    #[test]
    fn decode_error_clears_buffer_but_keeps_earlier_items() {
        let handler = DecoderHandler::new(LengthPrefixed);
        let (items, error) = handler.decode_available(&[0, 1, b'x', 0, 0, 7]);
        assert_eq!(items, vec![b"x".to_vec()]);
        assert!(matches!(error, Some(ChannelError::Decode(_))));
        assert_eq!(handler.buffered(), 0);
    }
}
