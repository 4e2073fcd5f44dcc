use std::{io, net::IpAddr};

use advmac::MacAddr6;
use compact_str::CompactString;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use nix::{ifaddrs::getifaddrs, net::if_::if_nametoindex};

/// Identity of the interface an advertiser runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: CompactString,
    pub index: u32,
    pub addr: MacAddr6,
}

impl Link {
    /// Resolve the kernel index and ethernet address of `name`.
    pub fn lookup(name: &str) -> io::Result<Self> {
        let index = if_nametoindex(name).map_err(|e| {
            io::Error::new(io::ErrorKind::NotFound, format!("interface {name}: {e}"))
        })?;

        let addr = getifaddrs()
            .map_err(io::Error::from)?
            .filter(|ifa| ifa.interface_name == name)
            .find_map(|ifa| ifa.address?.as_link_addr()?.addr())
            .map(MacAddr6::new)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no ethernet address found for interface {name}"),
                )
            })?;

        Ok(Self {
            name: name.into(),
            index,
            addr,
        })
    }
}

/// Current addresses on `name`, with prefix lengths taken from the netmasks.
pub fn interface_addrs(name: &str) -> io::Result<Vec<IpNet>> {
    let mut addrs = Vec::new();

    for ifa in getifaddrs().map_err(io::Error::from)? {
        if ifa.interface_name != name {
            continue;
        }
        let (Some(address), Some(netmask)) = (ifa.address, ifa.netmask) else {
            continue;
        };

        let net = if let (Some(a), Some(m)) = (address.as_sockaddr_in6(), netmask.as_sockaddr_in6())
        {
            ipnet::ipv6_mask_to_prefix(m.ip())
                .ok()
                .and_then(|len| Ipv6Net::new(a.ip(), len).ok())
                .map(IpNet::V6)
        } else if let (Some(a), Some(m)) = (address.as_sockaddr_in(), netmask.as_sockaddr_in()) {
            ipnet::ipv4_mask_to_prefix(m.ip())
                .ok()
                .and_then(|len| Ipv4Net::new(a.ip(), len).ok())
                .map(IpNet::V4)
        } else {
            None
        };

        addrs.extend(net);
    }

    Ok(addrs)
}

/// fe80::/10
pub fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V6(v6) => v6.segments()[0] & 0xffc0 == 0xfe80,
        IpAddr::V4(_) => false,
    }
}
