//! UDP transport: one commissioning and one operational socket feeding a shared,
//! bounded receive queue.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Type};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::messages::MAX_MESSAGE_SIZE;

pub const DEFAULT_OPERATIONAL_PORT: u16 = 5540;
pub const DEFAULT_COMMISSIONING_PORT: u16 = 5550;
pub const RECEIVE_QUEUE_SIZE: usize = 4;
const RECEIVE_ERROR_PAUSE: std::time::Duration = std::time::Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Commissioning,
    Operational,
}

#[derive(Debug, Clone)]
pub struct ReceivedDatagram {
    pub kind: PortKind,
    pub peer: SocketAddr,
    pub data: Vec<u8>,
}

pub struct Transport {
    commissioning: Arc<UdpSocket>,
    operational: Arc<UdpSocket>,
    receiver: mpsc::Receiver<ReceivedDatagram>,
    stop_receive_token: tokio_util::sync::CancellationToken,
}

fn bind_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let stdsocket = socket2::Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    stdsocket.set_reuse_address(true)?;
    stdsocket
        .bind(&socket2::SockAddr::from(addr))
        .context(format!("can't bind {}", addr))?;
    stdsocket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(stdsocket.into())?)
}

impl Transport {
    async fn read_from_socket_loop(
        socket: Arc<UdpSocket>,
        kind: PortKind,
        sender: mpsc::Sender<ReceivedDatagram>,
        stop_receive_token: tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        loop {
            // one spare byte to detect oversized datagrams
            let mut buf = vec![0u8; MAX_MESSAGE_SIZE + 1];
            let recv_resp = {
                tokio::select! {
                    recv_resp = socket.recv_from(&mut buf) => recv_resp,
                    _ = stop_receive_token.cancelled() => break
                }
            };
            let (n, peer) = match recv_resp {
                Ok(r) => r,
                Err(e) => {
                    // icmp unreachable and similar are reported here on some platforms
                    log::warn!("{:?} socket receive error: {}", kind, e);
                    tokio::select! {
                        _ = tokio::time::sleep(RECEIVE_ERROR_PAUSE) => continue,
                        _ = stop_receive_token.cancelled() => break
                    }
                }
            };
            if n > MAX_MESSAGE_SIZE {
                log::warn!("dropping oversized datagram from {}", peer);
                continue;
            }
            buf.truncate(n);
            match sender.try_send(ReceivedDatagram {
                kind,
                peer,
                data: buf,
            }) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("receive queue full, dropping datagram from {}", peer);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
        Ok(())
    }

    /// Bind both sockets on `address`. Port 0 picks an ephemeral port.
    pub async fn new(address: IpAddr, operational_port: u16, commissioning_port: u16) -> Result<Self> {
        let operational = Arc::new(bind_socket(SocketAddr::new(address, operational_port))?);
        let commissioning = Arc::new(bind_socket(SocketAddr::new(address, commissioning_port))?);
        let (sender, receiver) = mpsc::channel(RECEIVE_QUEUE_SIZE);
        let stop_receive_token = tokio_util::sync::CancellationToken::new();

        for (socket, kind) in [
            (operational.clone(), PortKind::Operational),
            (commissioning.clone(), PortKind::Commissioning),
        ] {
            let sender = sender.clone();
            let token = stop_receive_token.child_token();
            tokio::spawn(async move {
                if let Err(e) = Self::read_from_socket_loop(socket, kind, sender, token).await {
                    log::error!("{:?} receive loop stopped: {:#}", kind, e);
                }
            });
        }
        log::info!(
            "listening on {} (operational) and {} (commissioning)",
            operational.local_addr()?,
            commissioning.local_addr()?
        );
        Ok(Self {
            commissioning,
            operational,
            receiver,
            stop_receive_token,
        })
    }

    fn socket(&self, kind: PortKind) -> &Arc<UdpSocket> {
        match kind {
            PortKind::Commissioning => &self.commissioning,
            PortKind::Operational => &self.operational,
        }
    }

    pub fn local_addr(&self, kind: PortKind) -> Result<SocketAddr> {
        Ok(self.socket(kind).local_addr()?)
    }

    /// Next queued datagram, None when queue is empty.
    pub fn try_recv(&mut self) -> Option<ReceivedDatagram> {
        self.receiver.try_recv().ok()
    }

    /// Wait for next datagram.
    pub async fn recv(&mut self) -> Option<ReceivedDatagram> {
        self.receiver.recv().await
    }

    pub async fn send(&self, kind: PortKind, peer: SocketAddr, data: &[u8]) -> Result<()> {
        if data.len() > MAX_MESSAGE_SIZE {
            anyhow::bail!("datagram of {} bytes exceeds {}", data.len(), MAX_MESSAGE_SIZE);
        }
        self.socket(kind)
            .send_to(data, peer)
            .await
            .context(format!("send to {}", peer))?;
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop_receive_token.cancel();
    }
}
