use std::{net::Ipv6Addr, time::Duration};

use advmac::MacAddr6;
use compact_str::CompactString;
use ipnet::Ipv6Net;
use thiserror::Error;

use super::{
    Direction, DnsSearchList, Message, NdpOption, PrefixInformation, RecursiveDnsServer,
    RouterAdvertisement, RouterSolicitation,
};

const TYPE_ROUTER_SOLICITATION: u8 = 133;
const TYPE_ROUTER_ADVERTISEMENT: u8 = 134;

const OPT_SOURCE_LLA: u8 = 1;
const OPT_TARGET_LLA: u8 = 2;
const OPT_PREFIX_INFORMATION: u8 = 3;
const OPT_MTU: u8 = 5;
const OPT_RDNSS: u8 = 25;
const OPT_DNSSL: u8 = 31;

const FLAG_MANAGED: u8 = 0x80;
const FLAG_OTHER: u8 = 0x40;
const FLAG_ON_LINK: u8 = 0x80;
const FLAG_AUTONOMOUS: u8 = 0x40;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("message too short: {0} bytes")]
    Short(usize),
    #[error("unsupported ICMPv6 type {0}")]
    UnsupportedType(u8),
    #[error("malformed option type {kind}: {reason}")]
    MalformedOption { kind: u8, reason: &'static str },
    #[error("invalid domain name {0:?}")]
    InvalidDomainName(CompactString),
}

impl Message {
    /// Encode to ICMPv6 payload bytes. The checksum is left zero; the kernel
    /// fills it in for raw ICMPv6 sockets.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(128);
        match self {
            Message::RouterSolicitation(rs) => {
                buf.extend_from_slice(&[TYPE_ROUTER_SOLICITATION, 0, 0, 0]);
                buf.extend_from_slice(&[0; 4]);
                encode_options(&mut buf, &rs.options)?;
            }
            Message::RouterAdvertisement(ra) => {
                buf.extend_from_slice(&[TYPE_ROUTER_ADVERTISEMENT, 0, 0, 0]);
                buf.push(ra.current_hop_limit);

                let mut flags = 0;
                if ra.managed_configuration {
                    flags |= FLAG_MANAGED;
                }
                if ra.other_configuration {
                    flags |= FLAG_OTHER;
                }
                buf.push(flags);

                let lifetime = u16::try_from(ra.router_lifetime.as_secs()).unwrap_or(u16::MAX);
                buf.extend_from_slice(&lifetime.to_be_bytes());
                buf.extend_from_slice(&millis(ra.reachable_time).to_be_bytes());
                buf.extend_from_slice(&millis(ra.retransmit_timer).to_be_bytes());
                encode_options(&mut buf, &ra.options)?;
            }
        }

        Ok(buf)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < 8 {
            return Err(CodecError::Short(buf.len()));
        }

        match buf[0] {
            TYPE_ROUTER_SOLICITATION => Ok(Message::RouterSolicitation(RouterSolicitation {
                options: decode_options(&buf[8..])?,
            })),
            TYPE_ROUTER_ADVERTISEMENT => {
                if buf.len() < 16 {
                    return Err(CodecError::Short(buf.len()));
                }

                Ok(Message::RouterAdvertisement(RouterAdvertisement {
                    current_hop_limit: buf[4],
                    managed_configuration: buf[5] & FLAG_MANAGED != 0,
                    other_configuration: buf[5] & FLAG_OTHER != 0,
                    router_lifetime: Duration::from_secs(u64::from(u16::from_be_bytes([
                        buf[6], buf[7],
                    ]))),
                    reachable_time: Duration::from_millis(u64::from(be_u32(&buf[8..12]))),
                    retransmit_timer: Duration::from_millis(u64::from(be_u32(&buf[12..16]))),
                    options: decode_options(&buf[16..])?,
                }))
            }
            other => Err(CodecError::UnsupportedType(other)),
        }
    }
}

fn secs(d: Duration) -> u32 {
    u32::try_from(d.as_secs()).unwrap_or(u32::MAX)
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn ipv6_at(b: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&b[..16]);
    Ipv6Addr::from(octets)
}

fn encode_options(buf: &mut Vec<u8>, options: &[NdpOption]) -> Result<(), CodecError> {
    for opt in options {
        let start = buf.len();
        // type, then the length placeholder patched below
        buf.extend_from_slice(&[0, 0]);

        let kind = match opt {
            NdpOption::LinkLayerAddress { direction, addr } => {
                buf.extend_from_slice(&addr.to_array());
                match direction {
                    Direction::Source => OPT_SOURCE_LLA,
                    Direction::Target => OPT_TARGET_LLA,
                }
            }
            NdpOption::PrefixInformation(pi) => {
                buf.push(pi.prefix.prefix_len());
                let mut flags = 0;
                if pi.on_link {
                    flags |= FLAG_ON_LINK;
                }
                if pi.autonomous {
                    flags |= FLAG_AUTONOMOUS;
                }
                buf.push(flags);
                buf.extend_from_slice(&secs(pi.valid_lifetime).to_be_bytes());
                buf.extend_from_slice(&secs(pi.preferred_lifetime).to_be_bytes());
                buf.extend_from_slice(&[0; 4]);
                buf.extend_from_slice(&pi.prefix.network().octets());
                OPT_PREFIX_INFORMATION
            }
            NdpOption::Mtu(mtu) => {
                buf.extend_from_slice(&[0; 2]);
                buf.extend_from_slice(&mtu.to_be_bytes());
                OPT_MTU
            }
            NdpOption::RecursiveDnsServer(rdnss) => {
                buf.extend_from_slice(&[0; 2]);
                buf.extend_from_slice(&secs(rdnss.lifetime).to_be_bytes());
                for server in &rdnss.servers {
                    buf.extend_from_slice(&server.octets());
                }
                OPT_RDNSS
            }
            NdpOption::DnsSearchList(dnssl) => {
                buf.extend_from_slice(&[0; 2]);
                buf.extend_from_slice(&secs(dnssl.lifetime).to_be_bytes());
                for name in &dnssl.domain_names {
                    encode_domain_name(buf, name)?;
                }
                OPT_DNSSL
            }
            NdpOption::Unknown { kind, body } => {
                buf.extend_from_slice(body);
                *kind
            }
        };

        while (buf.len() - start) % 8 != 0 {
            buf.push(0);
        }

        let units = (buf.len() - start) / 8;
        buf[start] = kind;
        buf[start + 1] = u8::try_from(units).map_err(|_| CodecError::MalformedOption {
            kind,
            reason: "option longer than 2040 bytes",
        })?;
    }

    Ok(())
}

fn encode_domain_name(buf: &mut Vec<u8>, name: &CompactString) -> Result<(), CodecError> {
    let trimmed = name.trim_end_matches('.');
    // length octets of every label plus the root label
    if trimmed.len() + 2 > MAX_NAME_LEN {
        return Err(CodecError::InvalidDomainName(name.clone()));
    }

    let mut labels = 0;
    for label in trimmed.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(CodecError::InvalidDomainName(name.clone()));
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
        labels += 1;
    }
    if labels == 0 {
        return Err(CodecError::InvalidDomainName(name.clone()));
    }
    buf.push(0);
    Ok(())
}

fn decode_options(mut rest: &[u8]) -> Result<Vec<NdpOption>, CodecError> {
    let mut options = Vec::new();

    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(CodecError::Short(rest.len()));
        }

        let kind = rest[0];
        let total = usize::from(rest[1]) * 8;
        if total == 0 {
            return Err(CodecError::MalformedOption {
                kind,
                reason: "zero length",
            });
        }
        if total > rest.len() {
            return Err(CodecError::MalformedOption {
                kind,
                reason: "length exceeds message",
            });
        }

        let body = &rest[2..total];
        options.push(decode_option(kind, body)?);
        rest = &rest[total..];
    }

    Ok(options)
}

fn decode_option(kind: u8, body: &[u8]) -> Result<NdpOption, CodecError> {
    let opt = match kind {
        OPT_SOURCE_LLA | OPT_TARGET_LLA => {
            if body.len() < 6 {
                return Err(CodecError::MalformedOption {
                    kind,
                    reason: "not an ethernet address",
                });
            }
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&body[..6]);
            NdpOption::LinkLayerAddress {
                direction: if kind == OPT_SOURCE_LLA {
                    Direction::Source
                } else {
                    Direction::Target
                },
                addr: MacAddr6::new(mac),
            }
        }
        OPT_PREFIX_INFORMATION => {
            if body.len() != 30 {
                return Err(CodecError::MalformedOption {
                    kind,
                    reason: "prefix information must be 32 bytes",
                });
            }
            let prefix = Ipv6Net::new(ipv6_at(&body[14..30]), body[0]).map_err(|_| {
                CodecError::MalformedOption {
                    kind,
                    reason: "prefix length over 128",
                }
            })?;
            NdpOption::PrefixInformation(PrefixInformation {
                prefix,
                on_link: body[1] & FLAG_ON_LINK != 0,
                autonomous: body[1] & FLAG_AUTONOMOUS != 0,
                valid_lifetime: Duration::from_secs(u64::from(be_u32(&body[2..6]))),
                preferred_lifetime: Duration::from_secs(u64::from(be_u32(&body[6..10]))),
            })
        }
        OPT_MTU => {
            if body.len() != 6 {
                return Err(CodecError::MalformedOption {
                    kind,
                    reason: "mtu must be 8 bytes",
                });
            }
            NdpOption::Mtu(be_u32(&body[2..6]))
        }
        OPT_RDNSS => {
            if body.len() < 22 || (body.len() - 6) % 16 != 0 {
                return Err(CodecError::MalformedOption {
                    kind,
                    reason: "no server addresses",
                });
            }
            NdpOption::RecursiveDnsServer(RecursiveDnsServer {
                lifetime: Duration::from_secs(u64::from(be_u32(&body[2..6]))),
                servers: body[6..].chunks_exact(16).map(ipv6_at).collect(),
            })
        }
        OPT_DNSSL => {
            if body.len() < 14 {
                return Err(CodecError::MalformedOption {
                    kind,
                    reason: "no domain names",
                });
            }
            NdpOption::DnsSearchList(DnsSearchList {
                lifetime: Duration::from_secs(u64::from(be_u32(&body[2..6]))),
                domain_names: decode_domain_names(kind, &body[6..])?,
            })
        }
        _ => NdpOption::Unknown {
            kind,
            body: body.to_vec(),
        },
    };

    Ok(opt)
}

fn decode_domain_names(kind: u8, mut b: &[u8]) -> Result<Vec<CompactString>, CodecError> {
    let mut names = Vec::new();
    let mut labels: Vec<&str> = Vec::new();

    while let Some((&len, tail)) = b.split_first() {
        let len = usize::from(len);
        if len == 0 {
            // a zero byte either ends a name or is trailing padding
            if !labels.is_empty() {
                names.push(CompactString::from(labels.join(".")));
                labels.clear();
            }
            b = tail;
            continue;
        }
        if len > MAX_LABEL_LEN || len > tail.len() {
            return Err(CodecError::MalformedOption {
                kind,
                reason: "bad domain label",
            });
        }
        let label = std::str::from_utf8(&tail[..len]).map_err(|_| CodecError::MalformedOption {
            kind,
            reason: "domain label is not UTF-8",
        })?;
        labels.push(label);
        b = &tail[len..];
    }

    if !labels.is_empty() {
        return Err(CodecError::MalformedOption {
            kind,
            reason: "unterminated domain name",
        });
    }

    Ok(names)
}
