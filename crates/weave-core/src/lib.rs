//! weave-core：Netty 风格的通道流水线与 I/O 执行引擎。
//!
//! # 教案式导读
//! - **意图（Why）**：为网络客户端/服务端提供一个与协议无关、与传输无关的事件传播内核；
//!   HTTP、WebSocket 等协议层只需以 [`Handler`] 的形式挂入 [`Pipeline`]。
//! - **逻辑（How）**：
//!   1. [`Bootstrap`]/[`ServerBootstrap`] 构造 [`Channel`]，通道在构造时即拥有 Pipeline 与执行器；
//!   2. 入站事件由执行器从 head 进入，沿 head→tail 传播；
//!   3. 出站操作从 tail 进入，沿 tail→head 传播，最终在 head 交给 [`ChannelUnsafe`] 执行真实 I/O，
//!      并通过 [`ChannelFuture`] 报告结果。
//! - **契约（What）**：传输层通过 [`transport`] 模块中的窄能力 trait 声明自身支持的操作；
//!   缺失的能力是显式、可测试的空操作或失败路径。
//!
//! # 模块索引
//! - [`params`]：并发安全的参数袋与配置键；
//! - [`future`]：一次性完成的异步结果令牌；
//! - [`pipeline`]：Handler 契约、上下文与流水线；
//! - [`channel`]：通道门面与单飞执行器；
//! - [`bootstrap`]：客户端/服务端装配入口；
//! - [`codec`]：编解码插件点；
//! - [`observability`]：tracing 订阅器安装。

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod channel;
pub mod codec;
pub mod error;
pub mod future;
pub mod observability;
pub mod params;
pub mod pipeline;
pub mod transport;

use std::any::Any;

pub use bootstrap::{Bootstrap, ServerBootstrap, TransportFactory};
pub use channel::{Channel, ChannelKind, ChannelUnsafe};
pub use error::{ChannelError, Result};
pub use future::{ChannelFuture, Completable, FutureValue};
pub use params::{ParamValue, Params};
pub use pipeline::{ChannelInitializer, Handler, HandlerContext, LoggingHandler, Pipeline};
pub use transport::Transport;

/// 在流水线中流动的消息：任意可跨线程移动的值。
///
/// 传输层读出的字节通常是 [`bytes::Bytes`]；编解码 Handler 负责把它们转换为业务类型。
pub type Message = Box<dyn Any + Send>;
