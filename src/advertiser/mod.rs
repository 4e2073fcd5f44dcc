//! Per-interface Router Advertisement engine.
//!
//! An [`Advertiser`] multicasts unsolicited RAs at a randomized interval and
//! answers Router Solicitations, both through one rate-limited transmit path.
//! On shutdown it sends a final RA with a zero router lifetime if it was
//! acting as a default router, then restores the interface's autoconf
//! setting.

use std::{io, sync::Arc, time::Duration};

use rand::Rng;
use tokio::{
    sync::{watch, Mutex},
    time::{sleep, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    builder::Builder,
    config::Interface,
    error::Error,
    link::{self, Link},
    ndp::{Dialer, Direction, Message, NdpConn, NdpOption, RawDialer, ALL_NODES},
    sysctl::{Ipv6Sysctl, ProcSysctl},
};

#[cfg(test)]
mod tests;

/// RFC 4861 section 10 MIN_DELAY_BETWEEN_RAS.
pub const MIN_DELAY_BETWEEN_RAS: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Unsolicited,
    Solicited,
    Shutdown,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Unsolicited => "unsolicited",
            Kind::Solicited => "solicited",
            Kind::Shutdown => "shutdown",
        }
    }
}

pub struct Advertiser {
    cfg: Interface,
    link: Link,
    builder: Builder,
    dialer: Arc<dyn Dialer>,
    sysctl: Arc<dyn Ipv6Sysctl>,
}

/// State that lives for one `advertise` call.
struct Session {
    conn: Arc<dyn NdpConn>,
    forwarding: bool,
    /// Time of the last multicast RA. Held across the check and the send so
    /// the two activities cannot both pass the rate limit.
    last_multicast: Mutex<Option<Instant>>,
    /// Stops both activities. Set on shutdown or when either one fails.
    stop: watch::Sender<bool>,
}

/// Resolves once `rx` reads `true`, or once its sender is gone.
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

impl Advertiser {
    /// An advertiser for the host interface named in `cfg`, using a raw
    /// ICMPv6 socket and `/proc/sys` for kernel state.
    pub fn new(cfg: Interface) -> Result<Self, Error> {
        let link = Link::lookup(&cfg.name).map_err(|source| Error::Link {
            iface: cfg.name.clone(),
            source,
        })?;

        let name = cfg.name.to_string();
        let builder = Builder::new(Arc::new(move || link::interface_addrs(&name)));

        Ok(Self::with_parts(
            cfg,
            link,
            builder,
            Arc::new(RawDialer),
            Arc::new(ProcSysctl::default()),
        ))
    }

    pub fn with_parts(
        cfg: Interface,
        link: Link,
        builder: Builder,
        dialer: Arc<dyn Dialer>,
        sysctl: Arc<dyn Ipv6Sysctl>,
    ) -> Self {
        Self {
            cfg,
            link,
            builder,
            dialer,
            sysctl,
        }
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Advertise until `shutdown` reads `true`. Shutdown is a clean exit;
    /// every other failure, including one while shutting down, is returned.
    pub async fn advertise(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), Error> {
        let iface = self.name();

        let conn = self
            .dialer
            .dial(&self.link)
            .map_err(|e| self.transport("open NDP socket", e))?;

        let forwarding = self
            .sysctl
            .ipv6_forwarding(iface)
            .map_err(|e| self.system("read IPv6 forwarding", e))?;
        let autoconf = self
            .sysctl
            .ipv6_autoconf(iface)
            .map_err(|e| self.system("read IPv6 autoconfiguration", e))?;
        self.sysctl
            .set_ipv6_autoconf(iface, false)
            .map_err(|e| self.system("disable IPv6 autoconfiguration", e))?;

        if !forwarding && !self.cfg.default_lifetime.is_zero() {
            warn!(
                iface,
                "IPv6 forwarding is disabled, advertising a router lifetime of zero"
            );
        }
        info!(
            iface,
            ifindex = self.link.index,
            mac = %self.link.addr,
            min_interval = ?self.cfg.min_interval,
            max_interval = ?self.cfg.max_interval,
            default_router = forwarding && !self.cfg.default_lifetime.is_zero(),
            "starting router advertisements"
        );

        let session = Session {
            conn,
            forwarding,
            last_multicast: Mutex::new(None),
            stop: watch::channel(false).0,
        };
        let mut errors = Vec::new();

        if !*shutdown.borrow() {
            let activities = async {
                tokio::join!(self.unsolicited(&session), self.solicited(&session))
            };
            tokio::pin!(activities);

            // a failing activity stops its sibling but leaves `shutdown` alone
            let (unsolicited, solicited) = tokio::select! {
                res = &mut activities => res,
                _ = signalled(&mut shutdown) => {
                    session.stop.send_replace(true);
                    activities.await
                }
            };
            errors.extend(unsolicited.err());
            errors.extend(solicited.err());
        }

        // both activities are done, so nothing can follow this RA
        if session.forwarding && !self.cfg.default_lifetime.is_zero() {
            let _last = session.last_multicast.lock().await;
            if let Err(e) = self.transmit(&session, Kind::Shutdown).await {
                error!(iface, "failed to send final router advertisement: {e}");
                errors.push(e);
            }
        }

        if let Err(e) = self.sysctl.set_ipv6_autoconf(iface, autoconf) {
            error!(iface, autoconf, "failed to restore IPv6 autoconfiguration: {e}");
            errors.push(self.system("restore IPv6 autoconfiguration", e));
        }

        drop(session);
        info!(iface, errors = errors.len(), "stopped router advertisements");
        Error::join(errors)
    }

    /// Multicast one RA right away, then one per randomized interval.
    async fn unsolicited(&self, s: &Session) -> Result<(), Error> {
        let mut stopped = s.stop.subscribe();
        let mut delay = Duration::ZERO;

        loop {
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = signalled(&mut stopped) => return Ok(()),
                    _ = sleep(delay) => {}
                }
            }

            let mut last = s.last_multicast.lock().await;
            if *stopped.borrow() {
                return Ok(());
            }

            let wait = hold_off(*last, Instant::now());
            if !wait.is_zero() {
                delay = wait;
                continue;
            }

            self.multicast(s, &mut last, Kind::Unsolicited)
                .await
                .inspect_err(|_| {
                    s.stop.send_replace(true);
                })?;
            delay = self.next_interval();
        }
    }

    /// Answer Router Solicitations, dropping those inside the minimum delay.
    async fn solicited(&self, s: &Session) -> Result<(), Error> {
        let mut stopped = s.stop.subscribe();

        loop {
            let (msg, from) = tokio::select! {
                biased;
                _ = signalled(&mut stopped) => return Ok(()),
                res = s.conn.recv_from() => res.map_err(|e| {
                    s.stop.send_replace(true);
                    self.transport("receive NDP message", e)
                })?,
            };

            let Message::RouterSolicitation(_) = msg else {
                continue;
            };

            let mut last = s.last_multicast.lock().await;
            if *stopped.borrow() {
                return Ok(());
            }

            let wait = hold_off(*last, Instant::now());
            if !wait.is_zero() {
                debug!(iface = self.name(), %from, ?wait, "rate limited router solicitation");
                continue;
            }

            debug!(iface = self.name(), %from, "answering router solicitation");
            self.multicast(s, &mut last, Kind::Solicited)
                .await
                .inspect_err(|_| {
                    s.stop.send_replace(true);
                })?;
        }
    }

    /// Send through the rate limiter. A build failure skips this cycle.
    async fn multicast(
        &self,
        s: &Session,
        last: &mut Option<Instant>,
        kind: Kind,
    ) -> Result<(), Error> {
        match self.transmit(s, kind).await {
            Ok(()) => {
                *last = Some(Instant::now());
                Ok(())
            }
            Err(e @ Error::Build { .. }) => {
                error!(iface = self.name(), kind = kind.as_str(), "skipping router advertisement: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn transmit(&self, s: &Session, kind: Kind) -> Result<(), Error> {
        let mut ra = self.builder.build(&self.cfg).map_err(|source| Error::Build {
            iface: self.cfg.name.clone(),
            source,
        })?;

        if kind == Kind::Shutdown || !s.forwarding {
            ra.router_lifetime = Duration::ZERO;
        }
        ra.options.push(NdpOption::LinkLayerAddress {
            direction: Direction::Source,
            addr: self.link.addr,
        });

        let lifetime = ra.router_lifetime;
        let options = ra.options.len();
        s.conn
            .send_to(&Message::RouterAdvertisement(ra), ALL_NODES)
            .await
            .map_err(|e| self.transport("send router advertisement", e))?;

        debug!(
            iface = self.name(),
            kind = kind.as_str(),
            router_lifetime = ?lifetime,
            options,
            "sent router advertisement"
        );
        Ok(())
    }

    fn next_interval(&self) -> Duration {
        let (min, max) = (self.cfg.min_interval, self.cfg.max_interval);
        if min >= max {
            return max;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    fn transport(&self, op: &'static str, source: io::Error) -> Error {
        Error::Transport {
            iface: self.cfg.name.clone(),
            op,
            source,
        }
    }

    fn system(&self, op: &'static str, source: io::Error) -> Error {
        Error::System {
            iface: self.cfg.name.clone(),
            op,
            source,
        }
    }
}

/// How much longer a multicast RA must wait after the one sent at `last`.
fn hold_off(last: Option<Instant>, now: Instant) -> Duration {
    last.map_or(Duration::ZERO, |t| {
        MIN_DELAY_BETWEEN_RAS.saturating_sub(now.saturating_duration_since(t))
    })
}
