//! Common utilities for integration tests
#![allow(dead_code)]
use kcp_tunnel::config::{ChannelConfig, LimitsConfig};
use kcp_tunnel::connection::{Connector, LocalSocket};
use kcp_tunnel::control_protocol::PacketTag;
use kcp_tunnel::protocol::{self, Command, FragmentHeader};
use kcp_tunnel::transport::{
    OutboundSink, PacketFlags, PacketTransport, ReliableTransport, TransportFactory,
};
use kcp_tunnel::{FlowLimits, Multiplexer, Session, SessionSupervisor};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::rc::Rc;

/// Scripted local socket state, shared between the table and the test
#[derive(Default)]
pub struct MockState {
    pub inbound: VecDeque<Vec<u8>>,
    pub eof: bool,
    pub read_error: Option<io::ErrorKind>,
    pub written: Vec<u8>,
    /// Bytes the socket still accepts; `None` means unlimited
    pub write_budget: Option<usize>,
    pub write_error: Option<io::ErrorKind>,
    pub read_interest: bool,
    pub write_interest: bool,
    pub closed: bool,
}

#[derive(Clone, Default)]
pub struct MockSocket {
    pub state: Rc<RefCell<MockState>>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state.borrow_mut().inbound.push_back(bytes.to_vec());
    }

    pub fn set_eof(&self) {
        self.state.borrow_mut().eof = true;
    }

    pub fn set_read_error(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().read_error = Some(kind);
    }

    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.state.borrow_mut().write_budget = budget;
    }

    pub fn set_write_error(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().write_error = Some(kind);
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn read_interest(&self) -> bool {
        self.state.borrow().read_interest
    }

    pub fn write_interest(&self) -> bool {
        self.state.borrow().write_interest
    }
}

impl LocalSocket for MockSocket {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if let Some(kind) = state.read_error {
            return Err(kind.into());
        }
        match state.inbound.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.inbound.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if state.eof => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if let Some(kind) = state.write_error {
            return Err(kind.into());
        }
        let n = buf.len().min(state.write_budget.unwrap_or(usize::MAX));
        if n == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        state.written.extend_from_slice(&buf[..n]);
        if let Some(budget) = state.write_budget.as_mut() {
            *budget -= n;
        }
        Ok(n)
    }

    fn set_read_interest(&mut self, enabled: bool) {
        self.state.borrow_mut().read_interest = enabled;
    }

    fn set_write_interest(&mut self, enabled: bool) {
        self.state.borrow_mut().write_interest = enabled;
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.closed = true;
        state.read_interest = false;
        state.write_interest = false;
    }
}

/// Connector handing out mock sockets, keeps every socket it opened
#[derive(Clone, Default)]
pub struct MockConnector {
    pub sockets: Rc<RefCell<BTreeMap<u32, Vec<MockSocket>>>>,
    /// convs in the order connect was called
    pub history: Rc<RefCell<Vec<u32>>>,
    pub fail: Rc<Cell<bool>>,
}

impl MockConnector {
    /// Most recent socket opened for `conv`
    pub fn socket(&self, conv: u32) -> Option<MockSocket> {
        self.sockets
            .borrow()
            .get(&conv)
            .and_then(|list| list.last().cloned())
    }

    pub fn opened(&self, conv: u32) -> usize {
        self.sockets.borrow().get(&conv).map_or(0, |list| list.len())
    }
}

impl Connector<MockSocket> for MockConnector {
    fn connect(&mut self, conv: u32) -> io::Result<MockSocket> {
        self.history.borrow_mut().push(conv);
        if self.fail.get() {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        let socket = MockSocket::new();
        self.sockets
            .borrow_mut()
            .entry(conv)
            .or_default()
            .push(socket.clone());
        Ok(socket)
    }
}

/// Packet transport that records every packet instead of sending it
pub struct RecordingPacketTransport {
    pub sent: Vec<(Vec<u8>, PacketFlags)>,
    pub peer_known: bool,
    pub resets: usize,
}

impl RecordingPacketTransport {
    pub fn new(peer_known: bool) -> Self {
        Self {
            sent: Vec::new(),
            peer_known,
            resets: 0,
        }
    }

    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        self.sent.drain(..).map(|(bytes, _)| bytes).collect()
    }

    pub fn count_tag(&self, tag: PacketTag) -> usize {
        self.sent
            .iter()
            .filter(|(bytes, _)| bytes.starts_with(tag.as_bytes()))
            .count()
    }
}

impl PacketTransport for RecordingPacketTransport {
    fn send_packet(&mut self, bytes: &[u8], flags: PacketFlags) -> io::Result<usize> {
        self.sent.push((bytes.to_vec(), flags));
        Ok(bytes.len())
    }

    fn peer_known(&self) -> bool {
        self.peer_known
    }

    fn reset_handshake(&mut self) -> io::Result<()> {
        self.resets += 1;
        self.sent.push((Vec::new(), PacketFlags::FirstSyn));
        Ok(())
    }
}

/// In-memory reliable transport: submits go straight to the sink,
/// inputs queue up as whole messages
pub struct LoopbackTransport {
    sink: OutboundSink,
    inbox: VecDeque<Vec<u8>>,
    depth: Rc<Cell<usize>>,
    last_tick: Rc<Cell<u32>>,
}

impl LoopbackTransport {
    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }
}

impl ReliableTransport for LoopbackTransport {
    fn submit(&mut self, data: &[u8]) -> kcp_tunnel::Result<()> {
        self.sink.on_outbound_ready(data)?;
        Ok(())
    }

    fn input(&mut self, segment: &[u8]) -> kcp_tunnel::Result<()> {
        self.inbox.push_back(segment.to_vec());
        Ok(())
    }

    fn peek_size(&self) -> Option<usize> {
        self.inbox.front().map(|m| m.len())
    }

    fn poll_received(&mut self, buf: &mut [u8]) -> Option<usize> {
        let message = self.inbox.pop_front()?;
        buf[..message.len()].copy_from_slice(&message);
        Some(message.len())
    }

    fn tick(&mut self, now_ms: u32) {
        self.last_tick.set(now_ms);
    }

    fn outbound_queue_depth(&self) -> usize {
        self.depth.get()
    }
}

#[derive(Clone, Default)]
pub struct LoopbackFactory {
    /// Simulated send-queue depth shared by every instance
    pub depth: Rc<Cell<usize>>,
    /// Number of transports created so far
    pub created: Rc<Cell<usize>>,
    pub last_tick: Rc<Cell<u32>>,
}

impl TransportFactory for LoopbackFactory {
    type Transport = LoopbackTransport;

    fn create(&self, _config: &ChannelConfig, output: OutboundSink) -> LoopbackTransport {
        self.created.set(self.created.get() + 1);
        LoopbackTransport {
            sink: output,
            inbox: VecDeque::new(),
            depth: Rc::clone(&self.depth),
            last_tick: Rc::clone(&self.last_tick),
        }
    }
}

/// Limits small enough to exercise every gate in a test
pub fn test_limits() -> LimitsConfig {
    LimitsConfig {
        max_connections: 16,
        buffer_size: 256,
        max_send_queue: 8,
        max_pending_bytes: 64,
        ..LimitsConfig::default()
    }
}

/// One side of a tunnel wired to in-memory collaborators
pub struct Endpoint {
    pub session: Session<LoopbackFactory, MockSocket>,
    pub mux: Multiplexer,
    pub supervisor: SessionSupervisor,
    pub packets: Rc<RefCell<RecordingPacketTransport>>,
    pub factory: LoopbackFactory,
    pub connector: MockConnector,
}

impl Endpoint {
    pub fn initiating(limits: &LimitsConfig) -> Self {
        let packets = Rc::new(RefCell::new(RecordingPacketTransport::new(true)));
        let factory = LoopbackFactory::default();
        let session: Session<LoopbackFactory, MockSocket> = Session::initiating(
            factory.clone(),
            ChannelConfig::default(),
            packets.clone(),
            limits,
            0,
        );
        Self::assemble(session, packets, factory, MockConnector::default(), limits)
    }

    pub fn accepting(limits: &LimitsConfig) -> Self {
        let packets = Rc::new(RefCell::new(RecordingPacketTransport::new(true)));
        let factory = LoopbackFactory::default();
        let connector = MockConnector::default();
        let session: Session<LoopbackFactory, MockSocket> = Session::accepting(
            factory.clone(),
            ChannelConfig::default(),
            packets.clone(),
            limits,
            Box::new(connector.clone()),
            0,
        );
        Self::assemble(session, packets, factory, connector, limits)
    }

    fn assemble(
        session: Session<LoopbackFactory, MockSocket>,
        packets: Rc<RefCell<RecordingPacketTransport>>,
        factory: LoopbackFactory,
        connector: MockConnector,
        limits: &LimitsConfig,
    ) -> Self {
        Self {
            session,
            mux: Multiplexer::new(FlowLimits::from(limits)),
            supervisor: SessionSupervisor::new(limits),
            packets,
            factory,
            connector,
        }
    }

    /// Accept a new local mock socket, returning its conv
    pub fn accept(&mut self, socket: &MockSocket) -> Option<u32> {
        let socket = socket.clone();
        self.mux.on_local_accepted(&mut self.session, move |_| socket)
    }

    pub fn tick(&mut self, now_ms: u64) {
        self.mux.on_reliable_tick(&mut self.session, now_ms);
    }

    /// Feed raw bytes to the channel as if the peer had sent them
    pub fn inject(&mut self, bytes: &[u8], now_ms: u64) {
        let packet = PacketTag::PushData.wrap(bytes);
        self.session.on_packet_received(&packet, now_ms);
    }

    /// Frames this endpoint submitted since the last call
    pub fn take_frames(&mut self) -> Vec<(FragmentHeader, Vec<u8>)> {
        let packets = self.packets.borrow_mut().take_sent();
        let mut frames = Vec::new();
        for packet in packets {
            if let Some((PacketTag::PushData, body)) = PacketTag::parse(&packet) {
                let mut rest = body;
                while let Some((header, payload, consumed)) = protocol::try_decode(rest) {
                    frames.push((header, payload.to_vec()));
                    rest = &rest[consumed..];
                }
            }
        }
        frames
    }
}

/// Move every recorded packet from `from` into `to`
pub fn deliver(from: &mut Endpoint, to: &mut Endpoint, now_ms: u64) -> usize {
    let packets = from.packets.borrow_mut().take_sent();
    let count = packets.len();
    for packet in packets {
        to.session.on_packet_received(&packet, now_ms);
    }
    count
}

/// Exchange packets and tick both sides until nothing moves
pub fn pump(a: &mut Endpoint, b: &mut Endpoint, now_ms: u64) {
    for _ in 0..32 {
        let moved = deliver(a, b, now_ms) + deliver(b, a, now_ms);
        a.tick(now_ms);
        b.tick(now_ms);
        if moved == 0 {
            break;
        }
    }
}

/// Encode a single frame
pub fn frame(conv: u32, command: Command, payload: &[u8]) -> Vec<u8> {
    protocol::encode(conv, command, payload).to_vec()
}
