//! Host identity and local interface addresses

use std::net::IpAddr;
use tracing::warn;

/// Source of the hostname and local IP addresses reported by the inspector
pub trait NetworkInfo: Send + Sync {
    /// Hostname of the machine
    fn hostname(&self) -> String;

    /// Addresses bound to local interfaces. Per interface, IPv6 addresses
    /// come before IPv4 addresses; interfaces keep enumeration order.
    fn addresses(&self) -> Vec<String>;
}

/// Queries the operating system on every call
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNetworkInfo;

impl NetworkInfo for SystemNetworkInfo {
    fn hostname(&self) -> String {
        system_hostname().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read hostname");
            String::new()
        })
    }

    fn addresses(&self) -> Vec<String> {
        match if_addrs::get_if_addrs() {
            Ok(interfaces) => order_addresses(
                interfaces
                    .into_iter()
                    .map(|iface| {
                        let ip = iface.ip();
                        (iface.name, ip)
                    }),
            ),
            Err(e) => {
                warn!(error = %e, "Failed to enumerate network interfaces");
                Vec::new()
            }
        }
    }
}

/// Fixed answers, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticNetworkInfo {
    pub hostname: String,
    pub addresses: Vec<String>,
}

impl StaticNetworkInfo {
    pub fn new(hostname: impl Into<String>, addresses: Vec<String>) -> Self {
        Self {
            hostname: hostname.into(),
            addresses,
        }
    }
}

impl NetworkInfo for StaticNetworkInfo {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn addresses(&self) -> Vec<String> {
        self.addresses.clone()
    }
}

/// Group `(interface, address)` pairs per interface in first-seen order,
/// listing IPv6 before IPv4 inside each group
fn order_addresses(entries: impl IntoIterator<Item = (String, IpAddr)>) -> Vec<String> {
    let mut groups: Vec<(String, Vec<IpAddr>, Vec<IpAddr>)> = Vec::new();

    for (name, ip) in entries {
        let idx = match groups.iter().position(|(n, _, _)| *n == name) {
            Some(idx) => idx,
            None => {
                groups.push((name, Vec::new(), Vec::new()));
                groups.len() - 1
            }
        };
        match ip {
            IpAddr::V6(_) => groups[idx].1.push(ip),
            IpAddr::V4(_) => groups[idx].2.push(ip),
        }
    }

    groups
        .into_iter()
        .flat_map(|(_, v6, v4)| v6.into_iter().chain(v4))
        .map(|ip| ip.to_string())
        .collect()
}

#[cfg(unix)]
fn system_hostname() -> std::io::Result<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

#[cfg(not(unix))]
fn system_hostname() -> std::io::Result<String> {
    std::env::var("COMPUTERNAME")
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e))
}
