use std::{collections::HashSet, fs, net::Ipv6Addr, path::Path, time::Duration};

use compact_str::CompactString;
use ipnet::Ipv6Net;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    ndp::INFINITE,
    plugin::{Dnssl, Lifetime, Plugin, Prefix, Rdnss},
};

const MAX_INTERVAL_DEFAULT: u64 = 600;
const MAX_INTERVAL_RANGE: (u64, u64) = (4, 1800);
const MIN_INTERVAL_FLOOR: u64 = 3;
const MAX_DEFAULT_LIFETIME: u64 = 9000;
const MAX_REACHABLE_TIME_MS: u64 = 3_600_000;
const HOP_LIMIT_DEFAULT: u8 = 64;
const PREFIX_VALID_DEFAULT: u64 = 86_400;
const PREFIX_PREFERRED_DEFAULT: u64 = 14_400;
const MTU_RANGE: (u32, u32) = (1280, 65_535);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("interface {iface:?}: {reason}")]
    Invalid {
        iface: CompactString,
        reason: String,
    },
}

/// Validated daemon configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub interfaces: Vec<Interface>,
}

/// Everything needed to advertise on one interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interface {
    pub name: CompactString,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Zero means the router is not a default router.
    pub default_lifetime: Duration,
    pub hop_limit: u8,
    pub managed: bool,
    pub other_config: bool,
    pub reachable_time: Duration,
    pub retransmit_timer: Duration,
    pub plugins: Vec<Plugin>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(s)?;
        if raw.interfaces.is_empty() {
            return Err(invalid("", "no interfaces configured"));
        }

        let mut names = HashSet::new();
        let mut interfaces = Vec::with_capacity(raw.interfaces.len());
        for ri in raw.interfaces {
            let ifi = ri.validate()?;
            if !names.insert(ifi.name.clone()) {
                return Err(invalid(&ifi.name, "interface configured more than once"));
            }
            interfaces.push(ifi);
        }

        Ok(Self { interfaces })
    }
}

fn invalid(iface: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        iface: iface.into(),
        reason: reason.into(),
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    interfaces: Vec<RawInterface>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInterface {
    name: CompactString,
    max_interval: Option<u64>,
    min_interval: Option<u64>,
    default_lifetime: Option<u64>,
    hop_limit: Option<u8>,
    #[serde(default)]
    managed: bool,
    #[serde(default)]
    other_config: bool,
    #[serde(default)]
    reachable_time: u64,
    #[serde(default)]
    retransmit_timer: u64,
    #[serde(default)]
    plugins: Vec<RawPlugin>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawPlugin {
    Prefix {
        prefix: Ipv6Net,
        on_link: Option<bool>,
        autonomous: Option<bool>,
        valid_lifetime: Option<RawLifetime>,
        preferred_lifetime: Option<RawLifetime>,
    },
    Rdnss {
        servers: Vec<Ipv6Addr>,
        lifetime: Option<RawLifetime>,
    },
    Dnssl {
        domain_names: Vec<CompactString>,
        lifetime: Option<RawLifetime>,
    },
    Mtu {
        mtu: u32,
    },
}

/// Seconds, or one of the keywords `"auto"` and `"infinite"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLifetime {
    Secs(u64),
    Keyword(CompactString),
}

impl RawLifetime {
    fn lifetime(&self, iface: &str, allow_auto: bool) -> Result<Lifetime, ConfigError> {
        match self {
            RawLifetime::Secs(s) => Ok(Lifetime::Fixed(Duration::from_secs(*s))),
            RawLifetime::Keyword(k) if k.as_str() == "infinite" => Ok(Lifetime::Fixed(INFINITE)),
            RawLifetime::Keyword(k) if k.as_str() == "auto" && allow_auto => Ok(Lifetime::Auto),
            RawLifetime::Keyword(k) => Err(invalid(iface, format!("invalid lifetime {k:?}"))),
        }
    }
}

impl RawInterface {
    fn validate(self) -> Result<Interface, ConfigError> {
        let name = self.name;
        if name.is_empty() {
            return Err(invalid("", "interface name must not be empty"));
        }

        let max = self.max_interval.unwrap_or(MAX_INTERVAL_DEFAULT);
        if max < MAX_INTERVAL_RANGE.0 || max > MAX_INTERVAL_RANGE.1 {
            return Err(invalid(
                &name,
                format!(
                    "max_interval {max}s must be within [{}s, {}s]",
                    MAX_INTERVAL_RANGE.0, MAX_INTERVAL_RANGE.1
                ),
            ));
        }

        // RFC 4861 section 6.2.1: MinRtrAdvInterval defaults to a third of
        // MaxRtrAdvInterval, or to MaxRtrAdvInterval itself below 9 seconds
        let (min_default, min_ceiling) = if max >= 9 {
            (max / 3, max * 3 / 4)
        } else {
            (max, max)
        };
        let min = self.min_interval.unwrap_or(min_default);
        if min < MIN_INTERVAL_FLOOR || min > min_ceiling {
            return Err(invalid(
                &name,
                format!("min_interval {min}s must be within [{MIN_INTERVAL_FLOOR}s, {min_ceiling}s]"),
            ));
        }

        let lifetime = self.default_lifetime.unwrap_or(max * 3);
        if lifetime != 0 && (lifetime < max || lifetime > MAX_DEFAULT_LIFETIME) {
            return Err(invalid(
                &name,
                format!(
                    "default_lifetime {lifetime}s must be 0 or within [{max}s, {MAX_DEFAULT_LIFETIME}s]"
                ),
            ));
        }

        if self.reachable_time > MAX_REACHABLE_TIME_MS {
            return Err(invalid(
                &name,
                format!("reachable_time {}ms exceeds one hour", self.reachable_time),
            ));
        }

        let plugins = self
            .plugins
            .into_iter()
            .map(|p| p.validate(&name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Interface {
            min_interval: Duration::from_secs(min),
            max_interval: Duration::from_secs(max),
            default_lifetime: Duration::from_secs(lifetime),
            hop_limit: self.hop_limit.unwrap_or(HOP_LIMIT_DEFAULT),
            managed: self.managed,
            other_config: self.other_config,
            reachable_time: Duration::from_millis(self.reachable_time),
            retransmit_timer: Duration::from_millis(self.retransmit_timer),
            plugins,
            name,
        })
    }
}

fn fixed(lt: &Option<RawLifetime>, iface: &str, default: u64) -> Result<Duration, ConfigError> {
    match lt {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => Ok(raw.lifetime(iface, false)?.resolve(Duration::ZERO)),
    }
}

fn auto(lt: &Option<RawLifetime>, iface: &str) -> Result<Lifetime, ConfigError> {
    lt.as_ref()
        .map_or(Ok(Lifetime::Auto), |raw| raw.lifetime(iface, true))
}

impl RawPlugin {
    fn validate(self, iface: &str) -> Result<Plugin, ConfigError> {
        let plugin = match self {
            RawPlugin::Prefix {
                prefix,
                on_link,
                autonomous,
                valid_lifetime,
                preferred_lifetime,
            } => {
                let valid = fixed(&valid_lifetime, iface, PREFIX_VALID_DEFAULT)?;
                let preferred = fixed(&preferred_lifetime, iface, PREFIX_PREFERRED_DEFAULT)?;
                if preferred > valid {
                    return Err(invalid(
                        iface,
                        format!("prefix {prefix}: preferred lifetime exceeds valid lifetime"),
                    ));
                }
                if !prefix.addr().is_unspecified() {
                    if prefix.prefix_len() == 128 {
                        return Err(invalid(iface, format!("prefix {prefix}: /128 not allowed")));
                    }
                    if prefix.addr() != prefix.network() {
                        return Err(invalid(
                            iface,
                            format!("prefix {prefix}: host bits set, use {}", prefix.trunc()),
                        ));
                    }
                }
                Plugin::Prefix(Prefix {
                    prefix,
                    on_link: on_link.unwrap_or(true),
                    autonomous: autonomous.unwrap_or(true),
                    valid_lifetime: valid,
                    preferred_lifetime: preferred,
                })
            }
            RawPlugin::Rdnss { servers, lifetime } => Plugin::Rdnss(Rdnss {
                lifetime: auto(&lifetime, iface)?,
                servers,
            }),
            RawPlugin::Dnssl {
                domain_names,
                lifetime,
            } => Plugin::Dnssl(Dnssl {
                lifetime: auto(&lifetime, iface)?,
                domain_names,
            }),
            RawPlugin::Mtu { mtu } => {
                if mtu < MTU_RANGE.0 || mtu > MTU_RANGE.1 {
                    return Err(invalid(
                        iface,
                        format!("mtu {mtu} must be within [{}, {}]", MTU_RANGE.0, MTU_RANGE.1),
                    ));
                }
                Plugin::Mtu(mtu)
            }
        };

        plugin
            .check_encodable()
            .map_err(|e| invalid(iface, format!("{}: {e}", plugin.name())))?;
        Ok(plugin)
    }
}
