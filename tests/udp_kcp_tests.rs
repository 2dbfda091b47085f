/// KCP channel over real UDP sockets on localhost
mod common;

use common::{test_limits, MockConnector, MockSocket};
use kcp_tunnel::config::ChannelConfig;
use kcp_tunnel::connection::Connector;
use kcp_tunnel::transport::{KcpFactory, PacketFlags, PacketTransport, UdpPacketTransport};
use kcp_tunnel::{FlowLimits, Multiplexer, Session};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::time::{sleep, timeout, Duration, Instant};

struct Side {
    session: Session<KcpFactory, MockSocket>,
    mux: Multiplexer,
    udp: Rc<RefCell<UdpPacketTransport>>,
    learns_peer: bool,
}

impl Side {
    async fn receive(&mut self, now_ms: u64) {
        let socket = self.udp.borrow().socket();
        let mut buf = vec![0u8; 64 * 1024];
        while let Ok(Ok((n, from))) =
            timeout(Duration::from_millis(2), socket.recv_from(&mut buf)).await
        {
            if self.learns_peer {
                self.udp.borrow_mut().learn_peer(from);
            }
            self.session.on_packet_received(&buf[..n], now_ms);
        }
    }
}

async fn run_until<F>(client: &mut Side, server: &mut Side, started: Instant, done: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..300 {
        let now = started.elapsed().as_millis() as u64;
        client.mux.on_reliable_tick(&mut client.session, now);
        server.mux.on_reliable_tick(&mut server.session, now);
        server.receive(now).await;
        client.receive(now).await;
        if done() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_kcp_over_udp_carries_connection() {
    let limits = test_limits();
    let server_udp = UdpPacketTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let server_addr = server_udp.socket().local_addr().unwrap();
    let client_udp = UdpPacketTransport::connect(server_addr).unwrap();

    let server_udp = Rc::new(RefCell::new(server_udp));
    let client_udp = Rc::new(RefCell::new(client_udp));
    client_udp
        .borrow_mut()
        .send_packet(&[], PacketFlags::FirstSyn)
        .unwrap();

    let connector = MockConnector::default();
    let boxed: Box<dyn Connector<MockSocket>> = Box::new(connector.clone());
    let mut server = Side {
        session: Session::accepting(
            KcpFactory,
            ChannelConfig::default(),
            server_udp.clone(),
            &limits,
            boxed,
            0,
        ),
        mux: Multiplexer::new(FlowLimits::from(&limits)),
        udp: server_udp,
        learns_peer: true,
    };
    let mut client = Side {
        session: Session::initiating(
            KcpFactory,
            ChannelConfig::default(),
            client_udp.clone(),
            &limits,
            0,
        ),
        mux: Multiplexer::new(FlowLimits::from(&limits)),
        udp: client_udp,
        learns_peer: false,
    };

    let started = Instant::now();
    let local = MockSocket::new();
    let accepted = local.clone();
    let conv = client
        .mux
        .on_local_accepted(&mut client.session, move |_| accepted)
        .unwrap();
    local.push_inbound(b"ping over kcp");
    client.mux.on_local_readable(&mut client.session, conv);

    let delivered = run_until(&mut client, &mut server, started, || {
        connector
            .socket(conv)
            .is_some_and(|remote| remote.written() == b"ping over kcp")
    })
    .await;
    assert!(delivered, "payload did not reach the accepting side");
    assert!(server.udp.borrow().peer().is_some());

    let remote = connector.socket(conv).unwrap();
    remote.push_inbound(b"pong");
    server.mux.on_local_readable(&mut server.session, conv);
    let replied = run_until(&mut client, &mut server, started, || local.written() == b"pong").await;
    assert!(replied, "reply did not reach the initiating side");

    local.set_eof();
    client.mux.on_local_readable(&mut client.session, conv);
    let closed = run_until(&mut client, &mut server, started, || remote.is_closed()).await;
    assert!(closed, "close did not propagate");
}
