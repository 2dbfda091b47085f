use crate::config::ServerFullConfig;
use crate::connection::Connector;
use crate::event_loop::{EventLoop, TcpConnector, TokioSocket};
use crate::session::Session;
use crate::transport::{create_transport_server, resolve, KcpFactory, SharedPacketTransport};
use anyhow::Result;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::time::Instant;
use tracing::info;

/// 运行服务端
///
/// 在包传输层上等待客户端，每个远端 CONNECT 对应一条到目标地址的 TCP 连接。
pub async fn run_server(config: ServerFullConfig) -> Result<()> {
    config.validate()?;
    let server = &config.server;

    info!(
        "Starting KCP tunnel server on {}:{}, forwarding to {}:{} (mode: {})",
        server.bind_addr, server.bind_port, server.target_addr, server.target_port, server.mode
    );

    let target = resolve(&server.target_addr, server.target_port).await?;
    let udp = Rc::new(RefCell::new(create_transport_server(server).await?));
    let packets: SharedPacketTransport = udp.clone();
    info!("Packet transport listening on {}:{}", server.bind_addr, server.bind_port);

    let events = EventLoop::channel();
    let connector: Box<dyn Connector<TokioSocket>> =
        Box::new(TcpConnector::new(target, events.0.clone()));
    let started = Instant::now();
    let session = Session::accepting(
        KcpFactory,
        config.channel_config(),
        packets,
        &config.limits,
        connector,
        0,
    );

    EventLoop::new(session, udp, events, None, &config.limits, started)
        .run()
        .await?;

    info!("Server stopped gracefully");
    Ok(())
}
