use std::{
    io,
    net::Ipv6Addr,
    sync::{Arc, Mutex},
    time::Duration,
};

use ipnet::IpNet;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};

use super::{Advertiser, MIN_DELAY_BETWEEN_RAS};
use crate::{
    builder::Builder,
    config::Interface,
    error::Error,
    ndp::{
        Direction, DnsSearchList, Message, NdpOption, PrefixInformation, RecursiveDnsServer,
        RouterAdvertisement, RouterSolicitation, ALL_NODES,
    },
    plugin::{Dnssl, Lifetime, Plugin, Prefix, Rdnss},
    sysctl::Ipv6Sysctl,
    testutil::{self, MemSysctl, Peer, TestConn, TestDialer, MAC},
};

const IFACE: &str = "eth0";

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn iface(min: u64, max: u64) -> Interface {
    Interface {
        name: IFACE.into(),
        min_interval: secs(min),
        max_interval: secs(max),
        hop_limit: 64,
        ..Default::default()
    }
}

fn slla() -> NdpOption {
    NdpOption::LinkLayerAddress {
        direction: Direction::Source,
        addr: MAC,
    }
}

struct Env {
    peer: Peer,
    conn: Arc<TestConn>,
    sysctl: Arc<MemSysctl>,
    shutdown: watch::Sender<bool>,
}

impl Env {
    fn new() -> Self {
        Self::with_sysctl(MemSysctl::new(IFACE, true, true))
    }

    fn with_sysctl(sysctl: Arc<MemSysctl>) -> Self {
        let (conn, peer) = TestConn::new();
        Self {
            peer,
            conn,
            sysctl,
            shutdown: watch::channel(false).0,
        }
    }

    fn advertiser(&self, cfg: Interface) -> Advertiser {
        self.advertiser_with(cfg, Builder::default())
    }

    fn advertiser_with(&self, cfg: Interface, builder: Builder) -> Advertiser {
        Advertiser::with_parts(
            cfg,
            testutil::link(IFACE),
            builder,
            Arc::new(TestDialer::Conn(self.conn.clone())),
            self.sysctl.clone(),
        )
    }

    fn spawn(&self, cfg: Interface) -> JoinHandle<Result<(), Error>> {
        self.spawn_with(cfg, Builder::default())
    }

    fn spawn_with(&self, cfg: Interface, builder: Builder) -> JoinHandle<Result<(), Error>> {
        let ad = self.advertiser_with(cfg, builder);
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move { ad.advertise(shutdown).await })
    }

    async fn next_ra(&mut self) -> RouterAdvertisement {
        let (ra, dst) = self.peer.ras.recv().await.unwrap();
        assert_eq!(dst, ALL_NODES);
        ra
    }

    async fn quiet_for(&mut self, d: Duration) {
        assert!(
            timeout(d, self.peer.ras.recv()).await.is_err(),
            "unexpected router advertisement"
        );
    }

    fn solicit(&self) {
        self.peer
            .inbound
            .send(Ok(Message::RouterSolicitation(RouterSolicitation::default())))
            .unwrap();
    }

    fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    fn autoconf(&self) -> bool {
        self.sysctl.ipv6_autoconf(IFACE).unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn unsolicited_with_plugins() {
    let mut env = Env::new();
    let handle = env.spawn(Interface {
        other_config: true,
        plugins: vec![
            Plugin::Dnssl(Dnssl {
                lifetime: Lifetime::Auto,
                domain_names: vec!["lan.example.com".into()],
            }),
            Plugin::Mtu(1500),
            Plugin::Prefix(Prefix {
                prefix: "2001:db8::/64".parse().unwrap(),
                on_link: true,
                autonomous: true,
                valid_lifetime: secs(20),
                preferred_lifetime: secs(10),
            }),
            Plugin::Rdnss(Rdnss {
                lifetime: Lifetime::Fixed(secs(10)),
                servers: vec!["2001:db8::1".parse().unwrap()],
            }),
        ],
        ..iface(200, 600)
    });

    let ra = env.next_ra().await;
    assert_eq!(
        ra,
        RouterAdvertisement {
            current_hop_limit: 64,
            other_configuration: true,
            options: vec![
                NdpOption::DnsSearchList(DnsSearchList {
                    lifetime: secs(1800),
                    domain_names: vec!["lan.example.com".into()],
                }),
                NdpOption::Mtu(1500),
                NdpOption::PrefixInformation(PrefixInformation {
                    prefix: "2001:db8::/64".parse().unwrap(),
                    on_link: true,
                    autonomous: true,
                    valid_lifetime: secs(20),
                    preferred_lifetime: secs(10),
                }),
                NdpOption::RecursiveDnsServer(RecursiveDnsServer {
                    lifetime: secs(10),
                    servers: vec!["2001:db8::1".parse().unwrap()],
                }),
                slla(),
            ],
            ..Default::default()
        }
    );

    env.stop();
    handle.await.unwrap().unwrap();
    assert!(env.peer.ras.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn shutdown_zeroes_router_lifetime() {
    let mut env = Env::new();
    let handle = env.spawn(Interface {
        default_lifetime: secs(3),
        plugins: vec![Plugin::Mtu(1500)],
        ..iface(1, 1)
    });

    let first = env.next_ra().await;
    assert_eq!(first.router_lifetime, secs(3));

    env.stop();
    let last = env.next_ra().await;
    assert_eq!(last.router_lifetime, Duration::ZERO);
    assert_eq!(last.options, first.options);
    assert_eq!(last.options, vec![NdpOption::Mtu(1500), slla()]);

    handle.await.unwrap().unwrap();
    assert!(env.peer.ras.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn unsolicited_spacing_honors_min_delay() {
    let mut env = Env::new();
    let handle = env.spawn(iface(1, 1));

    let mut sent = Vec::new();
    for _ in 0..4 {
        env.next_ra().await;
        sent.push(Instant::now());
    }

    for pair in sent.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= MIN_DELAY_BETWEEN_RAS, "{gap:?}");
        assert!(gap < MIN_DELAY_BETWEEN_RAS + secs(1), "{gap:?}");
    }

    env.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn unsolicited_interval_within_bounds() {
    let mut env = Env::new();
    let handle = env.spawn(iface(4, 8));

    let mut sent = Vec::new();
    for _ in 0..6 {
        env.next_ra().await;
        sent.push(Instant::now());
    }

    // the timer wheel rounds deadlines up to the next millisecond
    let slack = Duration::from_millis(1);
    for pair in sent.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= secs(4) && gap <= secs(8) + slack, "{gap:?}");
    }

    env.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn solicitations_are_rate_limited() {
    let mut env = Env::new();
    let handle = env.spawn(iface(600, 600));

    env.next_ra().await;

    // too soon after the initial RA
    env.solicit();
    env.quiet_for(secs(1)).await;

    sleep(secs(3)).await;
    env.solicit();
    let ra = env.next_ra().await;
    assert_eq!(ra.source_link_layer_count(), 1);
    assert_eq!(ra.options.last(), Some(&slla()));

    env.solicit();
    env.solicit();
    env.quiet_for(secs(2)).await;

    env.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn other_messages_are_ignored() {
    let mut env = Env::new();
    let handle = env.spawn(iface(600, 600));

    env.next_ra().await;
    sleep(secs(4)).await;

    env.peer
        .inbound
        .send(Ok(Message::RouterAdvertisement(RouterAdvertisement::default())))
        .unwrap();
    env.quiet_for(secs(1)).await;

    env.solicit();
    env.next_ra().await;

    env.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_start() {
    let mut env = Env::new();
    env.stop();

    let res = timeout(secs(5), env.advertiser(iface(1, 1)).advertise(env.shutdown.subscribe()))
        .await
        .unwrap();
    res.unwrap();
    assert!(env.peer.ras.try_recv().is_err());
    assert!(env.autoconf());

    // a default router still withdraws itself
    let res = timeout(
        secs(5),
        env.advertiser(Interface {
            default_lifetime: secs(3),
            ..iface(1, 1)
        })
        .advertise(env.shutdown.subscribe()),
    )
    .await
    .unwrap();
    res.unwrap();

    let ra = env.next_ra().await;
    assert_eq!(ra.router_lifetime, Duration::ZERO);
    assert!(env.peer.ras.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn autoconf_disabled_while_running() {
    let mut env = Env::new();
    assert!(env.autoconf());

    let handle = env.spawn(iface(1, 1));
    env.next_ra().await;
    assert!(!env.autoconf());

    env.stop();
    handle.await.unwrap().unwrap();
    assert!(env.autoconf());
}

#[tokio::test(start_paused = true)]
async fn autoconf_left_off_when_it_was_off() {
    let mut env = Env::with_sysctl(MemSysctl::new(IFACE, false, true));

    let handle = env.spawn(iface(1, 1));
    env.next_ra().await;
    env.stop();
    handle.await.unwrap().unwrap();
    assert!(!env.autoconf());
}

#[tokio::test(start_paused = true)]
async fn forwarding_disabled_advertises_zero_lifetime() {
    let mut env = Env::with_sysctl(MemSysctl::new(IFACE, true, false));
    let handle = env.spawn(Interface {
        default_lifetime: secs(1800),
        ..iface(1, 1)
    });

    let ra = env.next_ra().await;
    assert_eq!(ra.router_lifetime, Duration::ZERO);

    // never a default router, so there is nothing to withdraw
    env.stop();
    handle.await.unwrap().unwrap();
    assert!(env.peer.ras.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn dial_failure() {
    let env = Env::new();
    let ad = Advertiser::with_parts(
        iface(1, 1),
        testutil::link(IFACE),
        Builder::default(),
        Arc::new(TestDialer::Fail),
        env.sysctl.clone(),
    );

    let err = ad.advertise(env.shutdown.subscribe()).await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
    assert!(env.autoconf());
}

#[tokio::test(start_paused = true)]
async fn missing_sysctl() {
    let mut env = Env::with_sysctl(MemSysctl::new("eth1", true, true));

    let err = env
        .advertiser(iface(1, 1))
        .advertise(env.shutdown.subscribe())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::System { .. }));
    assert!(env.peer.ras.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn send_failure_is_terminal() {
    let env = Env::new();
    env.conn.fail_sends();

    let handle = env.spawn(Interface {
        default_lifetime: secs(3),
        ..iface(1, 1)
    });
    let err = handle.await.unwrap().unwrap_err();

    // the initial RA and the final RA both failed
    assert_eq!(err.errors().len(), 2);
    assert!(err
        .errors()
        .iter()
        .all(|e| matches!(e, Error::Transport { op: "send router advertisement", .. })));
    assert!(!*env.shutdown.borrow());
    assert!(env.autoconf());
}

#[tokio::test(start_paused = true)]
async fn receive_failure_is_terminal() {
    let mut env = Env::new();
    let handle = env.spawn(iface(1, 1));

    env.next_ra().await;
    env.peer
        .inbound
        .send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        .unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::Transport {
            op: "receive NDP message",
            ..
        }
    ));
    assert!(env.autoconf());
}

#[tokio::test(start_paused = true)]
async fn restore_failure_is_reported() {
    let mut env = Env::new();
    env.sysctl.fail_restore();

    let handle = env.spawn(Interface {
        default_lifetime: secs(3),
        ..iface(1, 1)
    });
    env.next_ra().await;
    env.stop();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::System { .. }));
    // the final RA went out regardless
    assert_eq!(env.next_ra().await.router_lifetime, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn build_failure_skips_cycle() {
    let mut env = Env::new();
    let handle = env.spawn(Interface {
        plugins: vec![Plugin::Rdnss(Rdnss {
            lifetime: Lifetime::Auto,
            servers: vec![],
        })],
        ..iface(1, 1)
    });

    env.quiet_for(secs(10)).await;
    env.solicit();
    env.quiet_for(secs(1)).await;
    assert!(!handle.is_finished());

    env.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn oversized_option_skips_cycle() {
    let mut env = Env::new();
    let servers: Vec<Ipv6Addr> = (1..=128u16)
        .map(|i| Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, i))
        .collect();
    let handle = env.spawn(Interface {
        default_lifetime: secs(3),
        plugins: vec![Plugin::Rdnss(Rdnss {
            lifetime: Lifetime::Auto,
            servers,
        })],
        ..iface(1, 1)
    });

    env.quiet_for(secs(10)).await;
    env.solicit();
    env.quiet_for(secs(4)).await;
    assert!(!handle.is_finished());
    assert!(!*env.shutdown.borrow());

    // the final RA cannot be built either, which is reported on the way out
    env.stop();
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Build { .. }));
    assert!(env.autoconf());
}

#[tokio::test(start_paused = true)]
async fn automatic_prefixes_follow_interface_addresses() {
    let mut env = Env::new();
    let addrs: Arc<Mutex<Vec<IpNet>>> =
        Arc::new(Mutex::new(vec!["2001:db8::1/64".parse().unwrap()]));
    let source = addrs.clone();
    let builder = Builder::new(Arc::new(move || Ok(source.lock().unwrap().clone())));

    let handle = env.spawn_with(
        Interface {
            plugins: vec![Plugin::Prefix(Prefix {
                prefix: "::/64".parse().unwrap(),
                on_link: true,
                autonomous: true,
                valid_lifetime: secs(20),
                preferred_lifetime: secs(10),
            })],
            ..iface(4, 4)
        },
        builder,
    );

    let prefixes = |ra: &RouterAdvertisement| -> Vec<String> {
        ra.options
            .iter()
            .filter_map(|opt| match opt {
                NdpOption::PrefixInformation(pi) => Some(pi.prefix.to_string()),
                _ => None,
            })
            .collect()
    };

    let first = env.next_ra().await;
    assert_eq!(prefixes(&first), vec!["2001:db8::/64"]);

    *addrs.lock().unwrap() = vec![
        "fe80::1/64".parse().unwrap(),
        "fd00:1::20/64".parse().unwrap(),
    ];
    let second = env.next_ra().await;
    assert_eq!(prefixes(&second), vec!["fd00:1::/64"]);

    addrs.lock().unwrap().clear();
    let third = env.next_ra().await;
    assert!(prefixes(&third).is_empty());
    assert_eq!(third.options, vec![slla()]);

    env.stop();
    handle.await.unwrap().unwrap();
}
