//! Turns an interface configuration into a Router Advertisement.
//!
//! The builder is called fresh for every transmission so that automatic
//! prefixes follow address changes on the interface without a restart.

use std::{io, sync::Arc, time::Duration};

use compact_str::CompactString;
use ipnet::{IpNet, Ipv6Net};
use thiserror::Error;

use crate::{config::Interface, ndp::RouterAdvertisement};

/// Source of the addresses currently assigned to an interface.
pub type AddrsFn = Arc<dyn Fn() -> io::Result<Vec<IpNet>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid prefix {prefix}: {reason}")]
    InvalidPrefix {
        prefix: Ipv6Net,
        reason: &'static str,
    },
    #[error("{0} plugin has nothing to advertise")]
    EmptyPlugin(&'static str),
    #[error("invalid domain name {0:?}")]
    InvalidDomainName(CompactString),
    #[error("{plugin} option would be {len} bytes, over the 2040 byte limit")]
    OptionTooLarge { plugin: &'static str, len: usize },
    #[error("failed to list interface addresses: {0}")]
    Addrs(#[source] io::Error),
}

#[derive(Clone)]
pub struct Builder {
    addrs: AddrsFn,
}

impl Builder {
    pub fn new(addrs: AddrsFn) -> Self {
        Self { addrs }
    }

    /// A builder whose address source always reports `addrs`.
    pub fn with_addrs(addrs: Vec<IpNet>) -> Self {
        Self::new(Arc::new(move || Ok(addrs.clone())))
    }

    /// Build the RA for `ifi`. The Source Link-Layer Address option is not
    /// included; the sender appends it.
    pub fn build(&self, ifi: &Interface) -> Result<RouterAdvertisement, BuildError> {
        let mut ra = RouterAdvertisement {
            current_hop_limit: ifi.hop_limit,
            managed_configuration: ifi.managed,
            other_configuration: ifi.other_config,
            router_lifetime: ifi.default_lifetime,
            reachable_time: ifi.reachable_time,
            retransmit_timer: ifi.retransmit_timer,
            options: Vec::with_capacity(ifi.plugins.len() + 1),
        };

        let mut resolver = Resolver {
            max_interval: ifi.max_interval,
            addrs: &self.addrs,
            cache: None,
        };
        for plugin in &ifi.plugins {
            plugin.apply(&mut resolver, &mut ra.options)?;
        }

        Ok(ra)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::with_addrs(Vec::new())
    }
}

/// Interface state plugins may consult while building one RA.
pub(crate) struct Resolver<'a> {
    max_interval: Duration,
    addrs: &'a AddrsFn,
    cache: Option<Vec<IpNet>>,
}

impl Resolver<'_> {
    pub(crate) fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// Addresses are listed at most once per build, and only if a plugin asks.
    pub(crate) fn addrs(&mut self) -> Result<&[IpNet], BuildError> {
        if self.cache.is_none() {
            self.cache = Some((self.addrs)().map_err(BuildError::Addrs)?);
        }
        Ok(self.cache.as_deref().unwrap_or_default())
    }
}
