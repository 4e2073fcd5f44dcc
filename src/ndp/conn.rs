use std::{
    io,
    net::{Ipv6Addr, SocketAddr, SocketAddrV6},
    sync::Arc,
};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use super::{Dialer, Message, NdpConn, ALL_ROUTERS};
use crate::link::Link;

/// NDP messages must be sent with a hop limit of 255 (RFC 4861 section 6.1).
const NDP_HOP_LIMIT: u32 = 255;

/// Raw ICMPv6 socket bound to a single interface.
pub struct Conn {
    socket: UdpSocket,
    ifindex: u32,
    iface: String,
}

impl Conn {
    /// Open a raw ICMPv6 socket on `link`. Joins ff02::2 when `router` is set
    /// so Router Solicitations are delivered.
    pub fn dial(link: &Link, router: bool) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))?;

        #[cfg(target_os = "linux")]
        socket.bind_device(Some(link.name.as_bytes()))?;

        socket.set_multicast_if_v6(link.index)?;
        socket.set_multicast_hops_v6(NDP_HOP_LIMIT)?;
        socket.set_unicast_hops_v6(NDP_HOP_LIMIT)?;
        socket.set_multicast_loop_v6(false)?;
        if router {
            socket.join_multicast_v6(&ALL_ROUTERS, link.index)?;
        }
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(std::net::UdpSocket::from(socket))?;
        debug!(iface = %link.name, ifindex = link.index, "opened NDP socket");

        Ok(Self {
            socket,
            ifindex: link.index,
            iface: link.name.to_string(),
        })
    }
}

#[async_trait]
impl NdpConn for Conn {
    async fn send_to(&self, msg: &Message, dst: Ipv6Addr) -> io::Result<()> {
        let buf = msg
            .to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // link-local destinations need the scope id to pick the interface
        let dst = SocketAddr::V6(SocketAddrV6::new(dst, 0, 0, self.ifindex));
        let sent = self.socket.send_to(&buf, dst).await?;
        trace!(iface = %self.iface, %dst, sent, "sent NDP message");
        Ok(())
    }

    async fn recv_from(&self) -> io::Result<(Message, Ipv6Addr)> {
        let mut buf = [0u8; 1500];

        loop {
            let (amount, src) = self.socket.recv_from(&mut buf).await?;
            let src = match src {
                SocketAddr::V6(v6) => *v6.ip(),
                SocketAddr::V4(_) => continue,
            };

            // every ICMPv6 message on the link arrives here, most are not NDP
            match Message::from_bytes(&buf[..amount]) {
                Ok(msg) => return Ok((msg, src)),
                Err(e) => trace!(iface = %self.iface, %src, "ignoring ICMPv6 message: {e}"),
            }
        }
    }
}

/// Production [`Dialer`] handing out router-mode [`Conn`]s.
pub struct RawDialer;

impl Dialer for RawDialer {
    fn dial(&self, link: &Link) -> io::Result<Arc<dyn NdpConn>> {
        Ok(Arc::new(Conn::dial(link, true)?))
    }
}
