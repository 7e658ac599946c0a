#![warn(missing_docs)]

//! `weave-codec-line` 提供基于换行符分帧的文本编解码器。
//!
//! # 教案背景（Why）
//! - 演示协议层如何只依赖 `weave_core::codec` 的 [`Decoder`]/[`Encoder`] 契约接入流水线，无需改动内核；
//! - 行分隔协议语义直观，可聚焦展示半包缓冲、帧上限与 UTF-8 错误的处理路径。
//!
//! # 使用概览（How）
//! - 通过 [`DecoderHandler`](weave_core::codec::DecoderHandler) 与
//!   [`EncoderHandler`](weave_core::codec::EncoderHandler) 包装 [`LineDelimitedCodec`]，挂在字节传输之上；
//! - 入站得到去掉行尾的 `String`，出站写入 `String` 时自动追加 `\n`。
//!
//! # 风险提示（Trade-offs）
//! - 不提供转义策略；需要承载多行或二进制内容时应改用长度前缀协议。

mod line;

pub use crate::line::LineDelimitedCodec;
