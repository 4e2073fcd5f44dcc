//! NDP message model and transport.
//!
//! Only the two message types a router advertisement daemon needs are
//! modeled: Router Solicitation in, Router Advertisement out.

mod codec;
mod conn;

use std::{io, net::Ipv6Addr, sync::Arc, time::Duration};

use advmac::MacAddr6;
use async_trait::async_trait;
use compact_str::CompactString;
use ipnet::Ipv6Net;

use crate::link::Link;

pub use codec::CodecError;
pub use conn::{Conn, RawDialer};

/// ff02::1, the link-local all-nodes multicast group.
pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
/// ff02::2, the link-local all-routers multicast group.
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

/// Lifetime value meaning "never expires" for prefix and DNS options.
pub const INFINITE: Duration = Duration::from_secs(u32::MAX as u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RouterSolicitation(RouterSolicitation),
    RouterAdvertisement(RouterAdvertisement),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterSolicitation {
    pub options: Vec<NdpOption>,
}

/// RFC 4861 section 4.2 Router Advertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterAdvertisement {
    pub current_hop_limit: u8,
    pub managed_configuration: bool,
    pub other_configuration: bool,
    pub router_lifetime: Duration,
    pub reachable_time: Duration,
    pub retransmit_timer: Duration,
    pub options: Vec<NdpOption>,
}

impl RouterAdvertisement {
    /// Number of Source Link-Layer Address options carried by the message.
    pub fn source_link_layer_count(&self) -> usize {
        self.options
            .iter()
            .filter(|opt| {
                matches!(
                    opt,
                    NdpOption::LinkLayerAddress {
                        direction: Direction::Source,
                        ..
                    }
                )
            })
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NdpOption {
    LinkLayerAddress { direction: Direction, addr: MacAddr6 },
    PrefixInformation(PrefixInformation),
    Mtu(u32),
    RecursiveDnsServer(RecursiveDnsServer),
    DnsSearchList(DnsSearchList),
    /// Any option type this daemon does not interpret, kept verbatim.
    Unknown { kind: u8, body: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixInformation {
    pub prefix: Ipv6Net,
    pub on_link: bool,
    pub autonomous: bool,
    pub valid_lifetime: Duration,
    pub preferred_lifetime: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursiveDnsServer {
    pub lifetime: Duration,
    pub servers: Vec<Ipv6Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsSearchList {
    pub lifetime: Duration,
    pub domain_names: Vec<CompactString>,
}

/// A bound NDP endpoint on one interface.
#[async_trait]
pub trait NdpConn: Send + Sync {
    async fn send_to(&self, msg: &Message, dst: Ipv6Addr) -> io::Result<()>;

    /// Wait for the next NDP message addressed to this endpoint.
    async fn recv_from(&self) -> io::Result<(Message, Ipv6Addr)>;
}

/// Opens an [`NdpConn`] on an interface. The advertiser dials once per run.
pub trait Dialer: Send + Sync {
    fn dial(&self, link: &Link) -> io::Result<Arc<dyn NdpConn>>;
}
