#![doc = r#"
# weave-transport-tcp

## 设计动机（Why）
- **定位**：为 `weave-core` 提供基于 tokio 的 TCP 传输，实现内核定义的窄能力 trait。
- **架构角色**：内核只认识 [`Transport`](weave_core::Transport) 与能力访问器；本 crate 把
  `TcpListener`/`TcpStream` 的绑定、接受、连接、读写与关闭翻译为这些能力，并把 IO 错误归类到
  [`ChannelError`](weave_core::ChannelError)。

## 核心契约（What）
- [`NetServerChannel`]：绑定、接受、关闭；每个接受的连接以 [`NetChannel`] 为传输构造子通道；
- [`NetClientChannel`]：连接、读、写、关闭、断开；
- 读出的消息为 `bytes::Bytes`；读截止到期报告 `Skip`，对端关闭报告 `Eof`，写截止到期报告瞬时的
  `Timeout`；其余错误使通道失活。

## 实现策略（How）
- 连接拆分为读写两半，各自由 `tokio::sync::Mutex` 保护，读循环与写排水互不阻塞；
- 套接字选项在通道激活时通过 `post_active` 应用，`SO_LINGER` 经由 `socket2::SockRef` 设置；
- 接受失败按 1s 起翻倍退避，超过 64s 放弃。

## 风险与考量（Trade-offs）
- 读写两半的锁保证单个操作的原子性，但同一通道的并发写仍依赖内核执行器的 FIFO 队列串行化。
"#]

mod channel;
mod config;
mod connection;
mod error;
mod listener;

pub use channel::{NetChannel, NetClientChannel};
pub use config::TcpSocketConfig;
pub use listener::NetServerChannel;
