use bytes::{BufMut, BytesMut};
use weave_core::{
    ChannelError,
    codec::{DecodeOutcome, Decoder, Encoder},
};

const NEWLINE: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

/// 基于换行符的文本编解码器。
///
/// # 设计动机（Why）
/// - 日志流、交互式命令等文本协议普遍以换行分帧，是验证编解码插件点的最小完整样例。
///
/// # 行为概览（How）
/// - `decode`：查找首个 `\n`，切出该帧并去掉行尾（兼容 `\r\n`），再按 UTF-8 解析；找不到换行符时
///   不消费任何字节，返回 `Incomplete`；
/// - `encode`：写入文本并追加 `\n`。
///
/// # 契约说明（What）
/// - 设置了 `max_line_length` 时，单行正文超过上限以 [`ChannelError::FrameTooLong`] 失败；
///   未找到换行但已缓冲的字节超过上限时同样失败，避免无界增长；
/// - 非法 UTF-8 以 [`ChannelError::Decode`] 失败，对应帧已被消费。
#[derive(Debug, Clone, Default)]
pub struct LineDelimitedCodec {
    max_line_length: Option<usize>,
}

impl LineDelimitedCodec {
    /// 不限制行长度的编解码器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 限制单行正文长度（不含行尾）。
    pub fn with_max_line_length(limit: usize) -> Self {
        Self {
            max_line_length: Some(limit),
        }
    }

    /// 当前的行长度上限。
    pub fn max_line_length(&self) -> Option<usize> {
        self.max_line_length
    }

    fn check(&self, length: usize) -> Result<(), ChannelError> {
        match self.max_line_length {
            Some(limit) if length > limit => Err(ChannelError::FrameTooLong { length, limit }),
            _ => Ok(()),
        }
    }
}

impl Decoder for LineDelimitedCodec {
    type Item = String;

    fn decode(&self, src: &mut BytesMut) -> Result<DecodeOutcome<String>, ChannelError> {
        let Some(position) = src.iter().position(|byte| *byte == NEWLINE) else {
            self.check(src.len())?;
            return Ok(DecodeOutcome::Incomplete);
        };

        let mut frame = src.split_to(position + 1);
        frame.truncate(position);
        if frame.last() == Some(&CARRIAGE_RETURN) {
            frame.truncate(position - 1);
        }
        self.check(frame.len())?;
        String::from_utf8(frame.to_vec())
            .map(DecodeOutcome::Complete)
            .map_err(|err| ChannelError::Decode(format!("line payload is not valid UTF-8: {err}")))
    }
}

impl Encoder for LineDelimitedCodec {
    type Item = String;

    fn encode(&self, item: String, dst: &mut BytesMut) -> Result<(), ChannelError> {
        self.check(item.len())?;
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(NEWLINE);
        Ok(())
    }
}
