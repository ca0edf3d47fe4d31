//! Nameserver selection and host resolution for SIP targets.
//!
//! A user supplied `host[:port]` list wins; otherwise the system resolver
//! configuration is read and its IPv4 servers are used.

use std::net::{IpAddr, SocketAddr};

use hickory_resolver::config::{
    NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts,
};
use hickory_resolver::Resolver;
use log::{debug, info, warn};

use crate::{Result, SipError};

/// Same bound as the C resolver library (`MAXNS`).
pub const MAX_NS_COUNT: usize = 3;
pub const DEFAULT_DNS_PORT: u16 = 53;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameserverEntry {
    pub address: String,
    pub port: u16,
}

impl NameserverEntry {
    pub fn new(address: &str, port: u16) -> Self {
        Self {
            address: address.to_string(),
            port,
        }
    }
}

pub type NameserverList = heapless::Vec<NameserverEntry, MAX_NS_COUNT>;

/// Parse `host[:port],host[:port],...`.
///
/// A missing or non-numeric port means 53. Tokens with an empty address
/// are skipped, and everything past [`MAX_NS_COUNT`] is dropped.
pub fn parse_nameservers(list: &str) -> NameserverList {
    let mut out = NameserverList::new();
    for token in list.split(',') {
        let token = token.trim();
        let (address, port) = match token.split_once(':') {
            Some((address, port)) => (address.trim(), port.trim().parse().unwrap_or(DEFAULT_DNS_PORT)),
            None => (token, DEFAULT_DNS_PORT),
        };
        if address.is_empty() {
            debug!("skipping malformed name server entry {:?}", token);
            continue;
        }
        if out.push(NameserverEntry::new(address, port)).is_err() {
            debug!("name server list is full ({}), dropping {:?}", MAX_NS_COUNT, token);
            break;
        }
    }
    out
}

/// Name servers from the operating system resolver configuration.
pub fn system_nameservers() -> Result<NameserverList> {
    let (config, _opts) = hickory_resolver::system_conf::read_system_conf()
        .map_err(|err| SipError::Resolver(format!("failed to read system resolver config: {err}")))?;
    let servers = select_system_servers(config.name_servers().iter().map(|ns| ns.socket_addr));
    info!(
        "Found name servers {}, max allowed server {}",
        servers.len(),
        MAX_NS_COUNT
    );
    Ok(servers)
}

fn select_system_servers<I>(addrs: I) -> NameserverList
where
    I: IntoIterator<Item = SocketAddr>,
{
    // The system config lists every server once per protocol.
    let mut seen: Vec<SocketAddr> = Vec::new();
    for addr in addrs {
        if !seen.contains(&addr) {
            seen.push(addr);
        }
    }

    let mut out = NameserverList::new();
    for addr in seen.into_iter().take(MAX_NS_COUNT) {
        if !addr.is_ipv4() {
            info!("skip non IPv4 name server");
            continue;
        }
        // Bounded by take() above.
        let _ = out.push(NameserverEntry::new(&addr.ip().to_string(), addr.port()));
    }
    out
}

/// Resolver bound to an explicit list of name servers.
pub struct DnsResolver {
    inner: Resolver,
    servers: NameserverList,
}

impl core::fmt::Debug for DnsResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DnsResolver")
            .field("servers", &self.servers)
            .finish()
    }
}

impl DnsResolver {
    pub fn configure(entries: &[NameserverEntry]) -> Result<Self> {
        if entries.is_empty() {
            return Err(SipError::Resolver("no name servers configured".into()));
        }

        let mut group = Vec::with_capacity(entries.len());
        let mut servers = NameserverList::new();
        for (idx, entry) in entries.iter().take(MAX_NS_COUNT).enumerate() {
            let ip: IpAddr = entry.address.parse().map_err(|_| {
                SipError::Resolver(format!("invalid name server address {:?}", entry.address))
            })?;
            info!("Name server #{}: {}:{}", idx + 1, entry.address, entry.port);
            group.push(NameServerConfig::new(SocketAddr::new(ip, entry.port), Protocol::Udp));
            let _ = servers.push(entry.clone());
        }

        let config = ResolverConfig::from_parts(None, vec![], NameServerConfigGroup::from(group));
        let inner = Resolver::new(config, ResolverOpts::default())
            .map_err(|err| SipError::Resolver(format!("failed to create resolver: {err}")))?;

        Ok(Self { inner, servers })
    }

    pub fn servers(&self) -> &[NameserverEntry] {
        &self.servers
    }

    /// Resolve `host` to a socket address, preferring IPv4.
    pub fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        let lookup = self
            .inner
            .lookup_ip(host)
            .map_err(|err| SipError::Resolver(format!("{host}: {err}")))?;
        let addrs: Vec<IpAddr> = lookup.iter().collect();
        let ip = addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| SipError::Resolver(format!("{host}: no address records")))?;

        debug!("resolved {host} to {ip}");
        Ok(SocketAddr::new(ip, port))
    }
}

/// User list if given, system configuration otherwise. An empty result
/// from the user list is not fatal here; the caller decides.
pub fn select_nameservers(user_list: Option<&str>) -> Result<NameserverList> {
    match user_list {
        Some(list) if !list.trim().is_empty() => {
            let servers = parse_nameservers(list);
            if servers.is_empty() {
                warn!("no usable name servers in {:?}", list);
            }
            Ok(servers)
        }
        _ => system_nameservers(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_ports_and_defaults() {
        let list = parse_nameservers("8.8.8.8:553,9.9.9.1");
        assert_eq!(
            list.as_slice(),
            &[
                NameserverEntry::new("8.8.8.8", 553),
                NameserverEntry::new("9.9.9.1", 53),
            ]
        );
    }

    #[test]
    fn non_numeric_port_falls_back_to_default() {
        let list = parse_nameservers("1.1.1.1:dns");
        assert_eq!(list.as_slice(), &[NameserverEntry::new("1.1.1.1", 53)]);
    }

    #[test]
    fn keeps_first_max_entries_in_order() {
        let list = parse_nameservers("1.0.0.1,1.0.0.2:54,1.0.0.3,1.0.0.4,1.0.0.5");
        assert_eq!(list.len(), MAX_NS_COUNT);
        assert_eq!(list[0], NameserverEntry::new("1.0.0.1", 53));
        assert_eq!(list[1], NameserverEntry::new("1.0.0.2", 54));
        assert_eq!(list[2], NameserverEntry::new("1.0.0.3", 53));
    }

    #[test]
    fn skips_empty_addresses() {
        let list = parse_nameservers(",:53, 10.0.0.1 ,");
        assert_eq!(list.as_slice(), &[NameserverEntry::new("10.0.0.1", 53)]);
    }

    #[test]
    fn system_selection_skips_ipv6_and_duplicates() {
        let addrs = [
            SocketAddr::from_str("192.0.2.53:53").unwrap(),
            SocketAddr::from_str("192.0.2.53:53").unwrap(),
            SocketAddr::from_str("[2001:db8::53]:53").unwrap(),
            SocketAddr::from_str("198.51.100.53:5353").unwrap(),
            SocketAddr::from_str("203.0.113.53:53").unwrap(),
        ];
        let list = select_system_servers(addrs);
        assert_eq!(
            list.as_slice(),
            &[
                NameserverEntry::new("192.0.2.53", 53),
                NameserverEntry::new("198.51.100.53", 5353),
            ]
        );
    }

    #[test]
    fn configure_rejects_bad_input() {
        assert!(DnsResolver::configure(&[]).is_err());
        assert!(DnsResolver::configure(&[NameserverEntry::new("not-an-ip", 53)]).is_err());
    }

    #[test]
    fn literal_addresses_skip_dns() {
        let resolver = DnsResolver::configure(&[NameserverEntry::new("127.0.0.1", 53)]).unwrap();
        assert_eq!(resolver.servers().len(), 1);
        let addr = resolver.resolve("192.0.2.7", 5062).unwrap();
        assert_eq!(addr, SocketAddr::from_str("192.0.2.7:5062").unwrap());
    }
}
