use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Per-interface IPv6 kernel switches the advertiser touches.
///
/// `set_ipv6_autoconf` must be idempotent so a save/disable/restore cycle
/// leaves the interface exactly as it was found.
pub trait Ipv6Sysctl: Send + Sync {
    fn ipv6_autoconf(&self, iface: &str) -> io::Result<bool>;
    fn set_ipv6_autoconf(&self, iface: &str, enabled: bool) -> io::Result<()>;
    fn ipv6_forwarding(&self, iface: &str) -> io::Result<bool>;
}

/// Reads and writes `/proc/sys/net/ipv6/conf/<iface>/*`.
#[derive(Debug, Clone)]
pub struct ProcSysctl {
    root: PathBuf,
}

impl Default for ProcSysctl {
    fn default() -> Self {
        Self::with_root("/proc/sys/net/ipv6/conf")
    }
}

impl ProcSysctl {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, iface: &str, key: &str) -> PathBuf {
        self.root.join(iface).join(key)
    }

    fn read_bool(&self, iface: &str, key: &str) -> io::Result<bool> {
        let path = self.path(iface, key);
        parse_bool(&path, &fs::read_to_string(&path)?)
    }

    fn write_bool(&self, iface: &str, key: &str, value: bool) -> io::Result<()> {
        fs::write(self.path(iface, key), if value { "1" } else { "0" })
    }
}

fn parse_bool(path: &Path, s: &str) -> io::Result<bool> {
    // forwarding may hold values other than 0 and 1 on some kernels
    match s.trim().parse::<i64>() {
        Ok(n) => Ok(n != 0),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected value {:?} in {}", s.trim(), path.display()),
        )),
    }
}

impl Ipv6Sysctl for ProcSysctl {
    fn ipv6_autoconf(&self, iface: &str) -> io::Result<bool> {
        self.read_bool(iface, "autoconf")
    }

    fn set_ipv6_autoconf(&self, iface: &str, enabled: bool) -> io::Result<()> {
        self.write_bool(iface, "autoconf", enabled)
    }

    fn ipv6_forwarding(&self, iface: &str) -> io::Result<bool> {
        self.read_bool(iface, "forwarding")
    }
}
