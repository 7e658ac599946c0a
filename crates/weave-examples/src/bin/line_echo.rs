//! 行协议回显服务入口。
//!
//! 用法：`line_echo [监听地址] [子通道参数 TOML 文件]`，地址缺省为 `127.0.0.1:7007`。
//! 日志级别由 `RUST_LOG` 控制。

use std::net::SocketAddr;

use anyhow::{Context, Result};
use weave_core::{Params, observability::install_subscriber};
use weave_examples::LineEchoServer;

const DEFAULT_ADDR: &str = "127.0.0.1:7007";

#[tokio::main]
async fn main() -> Result<()> {
    install_subscriber().context("安装 tracing 订阅器失败")?;

    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = args
        .next()
        .as_deref()
        .unwrap_or(DEFAULT_ADDR)
        .parse()
        .context("监听地址格式非法")?;
    let child_params = match args.next() {
        Some(path) => {
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("读取配置文件 {path} 失败"))?;
            Params::from_toml_str(&source).with_context(|| format!("解析配置文件 {path} 失败"))?
        }
        None => Params::new(),
    };

    let server = LineEchoServer::bind(addr, &child_params)
        .await
        .with_context(|| format!("绑定 {addr} 失败"))?;
    println!("line echo listening on {}", server.local_addr());

    tokio::signal::ctrl_c().await.context("等待退出信号失败")?;
    server.shutdown().await;
    Ok(())
}
