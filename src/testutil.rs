//! In-memory stand-ins for the socket and sysctl seams.

use std::{
    collections::HashMap,
    io,
    net::Ipv6Addr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use advmac::MacAddr6;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    link::Link,
    ndp::{Dialer, Message, NdpConn, RouterAdvertisement},
    sysctl::Ipv6Sysctl,
};

pub const MAC: MacAddr6 = MacAddr6::new([0x02, 0x00, 0x5e, 0x10, 0x00, 0x01]);

pub fn link(name: &str) -> Link {
    Link {
        name: name.into(),
        index: 1,
        addr: MAC,
    }
}

#[derive(Default)]
struct Knobs {
    autoconf: bool,
    forwarding: bool,
}

/// Per-interface sysctl values held in memory. Unknown interfaces fail the
/// way a missing `/proc/sys` entry would.
#[derive(Default)]
pub struct MemSysctl {
    ifaces: Mutex<HashMap<String, Knobs>>,
    fail_restore: AtomicBool,
}

impl MemSysctl {
    pub fn new(iface: &str, autoconf: bool, forwarding: bool) -> Arc<Self> {
        let s = Self::default();
        s.ifaces.lock().unwrap().insert(
            iface.to_owned(),
            Knobs {
                autoconf,
                forwarding,
            },
        );
        Arc::new(s)
    }

    /// Fail every autoconf write that would turn it back on.
    pub fn fail_restore(&self) {
        self.fail_restore.store(true, Ordering::SeqCst);
    }

    fn with<T>(&self, iface: &str, f: impl FnOnce(&mut Knobs) -> T) -> io::Result<T> {
        let mut ifaces = self.ifaces.lock().unwrap();
        let knobs = ifaces
            .get_mut(iface)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no sysctl for {iface}")))?;
        Ok(f(knobs))
    }
}

impl Ipv6Sysctl for MemSysctl {
    fn ipv6_autoconf(&self, iface: &str) -> io::Result<bool> {
        self.with(iface, |k| k.autoconf)
    }

    fn set_ipv6_autoconf(&self, iface: &str, enabled: bool) -> io::Result<()> {
        if enabled && self.fail_restore.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        self.with(iface, |k| k.autoconf = enabled)
    }

    fn ipv6_forwarding(&self, iface: &str) -> io::Result<bool> {
        self.with(iface, |k| k.forwarding)
    }
}

/// An NDP endpoint backed by channels. Sent RAs come out of the receiver
/// returned by [`TestConn::new`]; messages pushed into the sender are
/// delivered to `recv_from`.
pub struct TestConn {
    sent: mpsc::UnboundedSender<(RouterAdvertisement, Ipv6Addr)>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<io::Result<Message>>>,
    fail_send: AtomicBool,
}

pub struct Peer {
    pub ras: mpsc::UnboundedReceiver<(RouterAdvertisement, Ipv6Addr)>,
    pub inbound: mpsc::UnboundedSender<io::Result<Message>>,
}

pub const PEER: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0x10);

impl TestConn {
    pub fn new() -> (Arc<Self>, Peer) {
        let (sent, ras) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            sent,
            inbound: tokio::sync::Mutex::new(inbound),
            fail_send: AtomicBool::new(false),
        });
        (
            conn,
            Peer {
                ras,
                inbound: inbound_tx,
            },
        )
    }

    pub fn fail_sends(&self) {
        self.fail_send.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NdpConn for TestConn {
    async fn send_to(&self, msg: &Message, dst: Ipv6Addr) -> io::Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NetworkDown, "link down"));
        }
        // anything the raw socket could not encode must fail here too
        msg.to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let Message::RouterAdvertisement(ra) = msg else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not an RA"));
        };
        // the peer hanging up is not the advertiser's problem
        let _ = self.sent.send((ra.clone(), dst));
        Ok(())
    }

    async fn recv_from(&self) -> io::Result<(Message, Ipv6Addr)> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(msg) => msg.map(|m| (m, PEER)),
            None => std::future::pending().await,
        }
    }
}

pub enum TestDialer {
    Conn(Arc<TestConn>),
    Fail,
}

impl Dialer for TestDialer {
    fn dial(&self, _link: &Link) -> io::Result<Arc<dyn NdpConn>> {
        match self {
            TestDialer::Conn(conn) => Ok(conn.clone()),
            TestDialer::Fail => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "raw sockets need CAP_NET_RAW",
            )),
        }
    }
}
