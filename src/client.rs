use crate::config::ClientFullConfig;
use crate::event_loop::EventLoop;
use crate::session::Session;
use crate::transport::{
    create_transport_client, resolve, KcpFactory, PacketFlags, PacketTransport,
    SharedPacketTransport,
};
use anyhow::{Context, Result};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{info, warn};

/// 运行客户端
///
/// 监听本地端口，每个接受的连接分配一个 conv 并通过可靠通道转发到服务端。
pub async fn run_client(config: ClientFullConfig) -> Result<()> {
    config.validate()?;
    let client = &config.client;

    info!(
        "Starting KCP tunnel client: {}:{} -> {}:{} (mode: {})",
        client.listen_addr, client.listen_port, client.server_addr, client.server_port, client.mode
    );

    let listen = resolve(&client.listen_addr, client.listen_port).await?;
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;
    info!("Listening for local connections on {}", listen);

    let udp = Rc::new(RefCell::new(create_transport_client(client).await?));
    // 首个握手包让服务端学到本端地址
    if let Err(e) = udp.borrow_mut().send_packet(&[], PacketFlags::FirstSyn) {
        warn!("Failed to send initial handshake: {}", e);
    }
    let packets: SharedPacketTransport = udp.clone();

    let events = EventLoop::channel();
    let started = Instant::now();
    let session = Session::initiating(
        KcpFactory,
        config.channel_config(),
        packets,
        &config.limits,
        0,
    );

    EventLoop::new(session, udp, events, Some(listener), &config.limits, started)
        .run()
        .await?;

    info!("Client stopped gracefully");
    Ok(())
}
