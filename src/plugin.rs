use std::{net::Ipv6Addr, time::Duration};

use compact_str::CompactString;
use ipnet::{IpNet, Ipv6Net};
use tracing::trace;

use crate::{
    builder::{BuildError, Resolver},
    link::is_link_local,
    ndp::{DnsSearchList, NdpOption, PrefixInformation, RecursiveDnsServer},
};

/// An NDP option length is counted in 8-octet units in a single byte.
const MAX_OPTION_LEN: usize = 255 * 8;
/// RFC 1035 section 2.3.4, counting length octets and the root label.
const MAX_DOMAIN_NAME_LEN: usize = 255;

/// A lifetime that is either fixed or derived from the advertising interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Three times the interface's maximum advertisement interval.
    Auto,
    Fixed(Duration),
}

impl Lifetime {
    pub fn resolve(self, max_interval: Duration) -> Duration {
        match self {
            Lifetime::Auto => max_interval * 3,
            Lifetime::Fixed(d) => d,
        }
    }
}

/// One configured contribution to an interface's Router Advertisements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plugin {
    Prefix(Prefix),
    Rdnss(Rdnss),
    Dnssl(Dnssl),
    Mtu(u32),
}

/// Prefix Information to advertise.
///
/// A prefix whose address is `::` is automatic: only its length is used, and
/// every global address on the interface with that prefix length is
/// advertised as its own prefix at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub prefix: Ipv6Net,
    pub on_link: bool,
    pub autonomous: bool,
    pub valid_lifetime: Duration,
    pub preferred_lifetime: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdnss {
    pub lifetime: Lifetime,
    pub servers: Vec<Ipv6Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dnssl {
    pub lifetime: Lifetime,
    pub domain_names: Vec<CompactString>,
}

impl Plugin {
    pub fn name(&self) -> &'static str {
        match self {
            Plugin::Prefix(_) => "prefix",
            Plugin::Rdnss(_) => "rdnss",
            Plugin::Dnssl(_) => "dnssl",
            Plugin::Mtu(_) => "mtu",
        }
    }

    /// Append this plugin's option(s) to `options`, in order.
    pub(crate) fn apply(
        &self,
        resolver: &mut Resolver<'_>,
        options: &mut Vec<NdpOption>,
    ) -> Result<(), BuildError> {
        match self {
            Plugin::Prefix(p) if p.is_automatic() => {
                // several addresses in one network yield a single prefix
                let mut seen: Vec<Ipv6Net> = Vec::new();
                for net in resolver.addrs()? {
                    if let Some(prefix) = p.matching(net) {
                        if !seen.contains(&prefix) {
                            seen.push(prefix);
                            options.push(p.option(prefix));
                        }
                    }
                }
            }
            Plugin::Prefix(p) => {
                if p.prefix.prefix_len() == 128 {
                    return Err(BuildError::InvalidPrefix {
                        prefix: p.prefix,
                        reason: "a /128 cannot be advertised",
                    });
                }
                if p.prefix.addr() != p.prefix.network() {
                    return Err(BuildError::InvalidPrefix {
                        prefix: p.prefix,
                        reason: "host bits are set",
                    });
                }
                options.push(p.option(p.prefix));
            }
            Plugin::Rdnss(r) => {
                self.check_encodable()?;
                options.push(NdpOption::RecursiveDnsServer(RecursiveDnsServer {
                    lifetime: r.lifetime.resolve(resolver.max_interval()),
                    servers: r.servers.clone(),
                }));
            }
            Plugin::Dnssl(d) => {
                self.check_encodable()?;
                options.push(NdpOption::DnsSearchList(DnsSearchList {
                    lifetime: d.lifetime.resolve(resolver.max_interval()),
                    domain_names: d.domain_names.clone(),
                }));
            }
            Plugin::Mtu(mtu) => options.push(NdpOption::Mtu(*mtu)),
        }

        Ok(())
    }
}

impl Plugin {
    /// Reject DNS plugins that cannot be put on the wire: empty lists, bad
    /// names, or an option longer than the length field can express.
    pub(crate) fn check_encodable(&self) -> Result<(), BuildError> {
        let len = match self {
            Plugin::Rdnss(r) => {
                if r.servers.is_empty() {
                    return Err(BuildError::EmptyPlugin(self.name()));
                }
                8 + 16 * r.servers.len()
            }
            Plugin::Dnssl(d) => {
                if d.domain_names.is_empty() {
                    return Err(BuildError::EmptyPlugin(self.name()));
                }
                if let Some(bad) = d.domain_names.iter().find(|n| !valid_domain_name(n)) {
                    return Err(BuildError::InvalidDomainName(bad.clone()));
                }
                let names: usize = d.domain_names.iter().map(|n| encoded_name_len(n)).sum();
                (8 + names).next_multiple_of(8)
            }
            Plugin::Prefix(_) | Plugin::Mtu(_) => return Ok(()),
        };

        if len > MAX_OPTION_LEN {
            return Err(BuildError::OptionTooLarge {
                plugin: self.name(),
                len,
            });
        }
        Ok(())
    }
}

impl Prefix {
    pub fn is_automatic(&self) -> bool {
        self.prefix.addr().is_unspecified()
    }

    /// The network `net` belongs to, if it is eligible for an automatic prefix.
    fn matching(&self, net: &IpNet) -> Option<Ipv6Net> {
        let IpNet::V6(v6) = net else {
            return None;
        };
        let ip = v6.addr();
        if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
            return None;
        }
        if is_link_local(&ip.into()) {
            return None;
        }
        if v6.prefix_len() != self.prefix.prefix_len() {
            trace!(addr = %v6, want = self.prefix.prefix_len(), "prefix length mismatch");
            return None;
        }
        Some(v6.trunc())
    }

    fn option(&self, prefix: Ipv6Net) -> NdpOption {
        NdpOption::PrefixInformation(PrefixInformation {
            prefix,
            on_link: self.on_link,
            autonomous: self.autonomous,
            valid_lifetime: self.valid_lifetime,
            preferred_lifetime: self.preferred_lifetime,
        })
    }
}

/// Wire length of `name`: a length octet per label plus the root label.
fn encoded_name_len(name: &str) -> usize {
    name.trim_end_matches('.').len() + 2
}

pub(crate) fn valid_domain_name(name: &str) -> bool {
    let trimmed = name.trim_end_matches('.');
    !trimmed.is_empty()
        && encoded_name_len(trimmed) <= MAX_DOMAIN_NAME_LEN
        && trimmed
            .split('.')
            .all(|label| !label.is_empty() && label.len() <= 63)
}
