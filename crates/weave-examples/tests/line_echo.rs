//! 行协议回显服务的端到端测试。

use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use weave_core::{Params, params::keys};
use weave_examples::LineEchoServer;

async fn start(child_params: &Params) -> LineEchoServer {
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    LineEchoServer::bind(addr, child_params)
        .await
        .expect("回显服务应能绑定回环地址")
}

async fn next_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("等待回显超时")
        .expect("读取回显失败");
    line
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lines_are_echoed_even_when_split_across_writes() {
    let server = start(&Params::new()).await;
    let stream = TcpStream::connect(server.local_addr()).await.expect("连接失败");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"hello\nwor").await.expect("写入失败");
    assert_eq!(next_line(&mut reader).await, "hello\n");

    tokio::time::sleep(Duration::from_millis(20)).await;
    write_half.write_all(b"ld\r\n").await.expect("写入失败");
    assert_eq!(next_line(&mut reader).await, "world\n", "半包应在补齐后回显，且去掉 \\r");

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn quit_closes_the_connection() {
    let server = start(&Params::new()).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.expect("连接失败");
    stream.write_all(b"quit\n").await.expect("写入失败");

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .expect("服务端应主动关闭连接")
        .expect("读取失败");
    assert_eq!(read, 0, "quit 不应产生回显");

    for _ in 0..100 {
        if server.channel().child_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.channel().child_count(), 0, "关闭的子通道应离开登记表");
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlong_lines_are_dropped_and_the_session_continues() {
    let params = Params::new();
    params.set(keys::MAX_FRAME_LENGTH, 8usize);
    let server = start(&params).await;
    let stream = TcpStream::connect(server.local_addr()).await.expect("连接失败");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half
        .write_all(b"this line is far too long\n")
        .await
        .expect("写入失败");
    tokio::time::sleep(Duration::from_millis(50)).await;
    write_half.write_all(b"ok\n").await.expect("写入失败");
    assert_eq!(next_line(&mut reader).await, "ok\n", "超长行被丢弃后仍应继续服务");

    server.shutdown().await;
}
