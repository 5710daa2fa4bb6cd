use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use bgp_wire::{BGP_HEADER_LEN, BGP_PACKET_LEN, BgpPacket, peek_bgp_length};

use crate::context::Task;

use super::fsm::Event;
use super::inst::Message;

/// Above this many queued messages the session reports itself not ready
/// and keepalive transmission is suspended until the writer drains.
const SEND_HIGH_WATERMARK: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Active,
    Passive,
}

/// One live TCP transport instance. The reader turns framed bytes into
/// typed state-machine events tagged with the session serial; the writer
/// owns the socket's send half. Dropping the session aborts both tasks,
/// but the drop itself is deferred through EvDeleteSession so in-flight
/// events referencing the serial are drained first.
pub struct Session {
    pub serial: u64,
    pub kind: SessionKind,
    pub remote: SocketAddr,
    pub local: Option<SocketAddr>,
    pub open_sent: bool,
    packet_tx: UnboundedSender<BytesMut>,
    queue_depth: Arc<AtomicUsize>,
    _reader: Task<()>,
    _writer: Task<()>,
}

impl Session {
    pub fn start(
        stream: TcpStream,
        serial: u64,
        kind: SessionKind,
        ident: IpAddr,
        tx: mpsc::Sender<Message>,
    ) -> Session {
        let remote = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::new(ident, 0));
        let local = stream.local_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let (packet_tx, packet_rx) = mpsc::unbounded_channel::<BytesMut>();
        let queue_depth = Arc::new(AtomicUsize::new(0));

        let reader = start_reader(serial, ident, tx.clone(), read_half);
        let writer = start_writer(serial, ident, tx, write_half, packet_rx, queue_depth.clone());

        Session {
            serial,
            kind,
            remote,
            local,
            open_sent: false,
            packet_tx,
            queue_depth,
            _reader: reader,
            _writer: writer,
        }
    }

    pub fn send(&self, bytes: BytesMut) -> bool {
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
        self.packet_tx.send(bytes).is_ok()
    }

    /// False while the writer is backlogged; the hold timer keeps running
    /// regardless, so a dead transport still tears the session down.
    pub fn is_send_ready(&self) -> bool {
        self.queue_depth.load(Ordering::Relaxed) <= SEND_HIGH_WATERMARK
    }
}

fn start_reader(
    serial: u64,
    ident: IpAddr,
    tx: mpsc::Sender<Message>,
    mut read_half: OwnedReadHalf,
) -> Task<()> {
    Task::spawn(async move {
        let mut buf = BytesMut::with_capacity(BGP_PACKET_LEN * 2);
        loop {
            match read_half.read_buf(&mut buf).await {
                Ok(0) => {
                    let _ = tx.send(Message::Event(ident, Event::TcpClose(serial))).await;
                    return;
                }
                Ok(_) => {
                    loop {
                        let Some(length) = peek_bgp_length(&buf) else {
                            break;
                        };
                        if !((BGP_HEADER_LEN as usize)..=BGP_PACKET_LEN).contains(&length) {
                            let err = bgp_wire::WireError::BadMessageLength(length as u16);
                            let _ = tx
                                .send(Message::Event(ident, Event::ParseError(serial, err)))
                                .await;
                            return;
                        }
                        if buf.len() < length {
                            break;
                        }
                        let frame = buf.split_to(length);
                        match BgpPacket::parse_packet(&frame) {
                            Ok((_, packet)) => {
                                let event = match packet {
                                    BgpPacket::Open(open) => Event::BgpOpen(serial, open),
                                    BgpPacket::Keepalive(_) => Event::BgpKeepalive(serial),
                                    BgpPacket::Update(update) => Event::BgpUpdate(serial, update),
                                    BgpPacket::Notification(notif) => {
                                        Event::BgpNotification(serial, notif)
                                    }
                                };
                                let _ = tx.send(Message::Event(ident, event)).await;
                            }
                            Err(err) => {
                                let _ = tx
                                    .send(Message::Event(ident, Event::ParseError(serial, err)))
                                    .await;
                                return;
                            }
                        }
                    }
                }
                Err(_) => {
                    let _ = tx.send(Message::Event(ident, Event::TcpClose(serial))).await;
                    return;
                }
            }
        }
    })
}

fn start_writer(
    serial: u64,
    ident: IpAddr,
    tx: mpsc::Sender<Message>,
    mut write_half: OwnedWriteHalf,
    mut rx: UnboundedReceiver<BytesMut>,
    queue_depth: Arc<AtomicUsize>,
) -> Task<()> {
    Task::spawn(async move {
        let mut was_blocked = false;
        while let Some(msg) = rx.recv().await {
            if write_half.write_all(&msg).await.is_err() {
                let _ = tx.send(Message::Event(ident, Event::TcpClose(serial))).await;
                return;
            }
            let depth = queue_depth.fetch_sub(1, Ordering::Relaxed) - 1;
            if depth > SEND_HIGH_WATERMARK {
                was_blocked = true;
            } else if was_blocked {
                was_blocked = false;
                let _ = tx.send(Message::Event(ident, Event::SendReady(serial))).await;
            }
        }
    })
}
