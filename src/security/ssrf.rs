//! SSRF protection: resolve-then-check validation of outbound URLs.
//!
//! Before the service dereferences a caller-supplied URL we must make sure
//! it cannot be steered at internal infrastructure. Checking the hostname
//! string alone is not enough: a public-looking name can resolve to a
//! private address (DNS rebinding), so every resolved address is checked.
//!
//! The verdict is point-in-time. Callers that go on to connect should pin
//! the connection to [`ApprovedTarget::addrs`] rather than resolve again
//! (see [`crate::fetch::GuardedClient`]).

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

/// Default bound on a single hostname resolution.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// IPv4 ranges that outbound requests must never reach, as (network, prefix).
const BLOCKED_V4: &[(Ipv4Addr, u32)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),       // "this network"
    (Ipv4Addr::new(10, 0, 0, 0), 8),      // RFC 1918
    (Ipv4Addr::new(100, 64, 0, 0), 10),   // carrier-grade NAT
    (Ipv4Addr::new(127, 0, 0, 0), 8),     // loopback
    (Ipv4Addr::new(169, 254, 0, 0), 16),  // link-local, cloud metadata
    (Ipv4Addr::new(172, 16, 0, 0), 12),   // RFC 1918
    (Ipv4Addr::new(192, 0, 0, 0), 24),    // IETF protocol assignments
    (Ipv4Addr::new(192, 0, 2, 0), 24),    // TEST-NET-1
    (Ipv4Addr::new(192, 168, 0, 0), 16),  // RFC 1918
    (Ipv4Addr::new(198, 18, 0, 0), 15),   // benchmarking
    (Ipv4Addr::new(198, 51, 100, 0), 24), // TEST-NET-2
    (Ipv4Addr::new(203, 0, 113, 0), 24),  // TEST-NET-3
    (Ipv4Addr::new(224, 0, 0, 0), 4),     // multicast
    (Ipv4Addr::new(240, 0, 0, 0), 4),     // reserved, broadcast
];

/// Outcome of an SSRF check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The URL may be fetched.
    Allow,
    /// The URL must not be fetched.
    Deny,
}

impl Verdict {
    /// Returns `true` for [`Verdict::Allow`].
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Why a URL was denied.
///
/// Only for logs and tests: every variant collapses to the same
/// [`Verdict::Deny`] / [`crate::Error::UrlDenied`] for callers, so the
/// response never reveals anything about internal topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    /// The candidate is not an absolute URL
    #[error("unparsable URL")]
    UnparsableUrl,
    /// Scheme other than `http` / `https`
    #[error("scheme '{0}' is not allowed")]
    DisallowedScheme(String),
    /// Host is a blocked literal such as `localhost`
    #[error("hostname '{0}' is not allowed")]
    DisallowedHostnameLiteral(String),
    /// Resolution failed, timed out, or returned nothing
    #[error("could not resolve '{0}'")]
    ResolutionFailure(String),
    /// A resolved address is private, loopback, or otherwise reserved
    #[error("'{host}' resolves to non-public address {addr}")]
    PrivateAddressMatch {
        /// Hostname as it appeared in the URL
        host: String,
        /// The offending address
        addr: IpAddr,
    },
}

/// A URL that passed every check, with the addresses it was checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedTarget {
    /// The parsed URL
    pub url: Url,
    /// Every address the host resolved to (all public)
    pub addrs: Vec<SocketAddr>,
}

/// Hostname resolution, injectable so checks can run without the network.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Resolve `host` to all of its addresses (both families).
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// Fixed host table. Unknown hosts fail with `NotFound`.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the answer for `host`
    #[must_use]
    pub fn with_host(mut self, host: &str, addrs: &[IpAddr]) -> Self {
        self.entries
            .insert(host.to_ascii_lowercase(), addrs.to_vec());
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        self.entries
            .get(&host.to_ascii_lowercase())
            .map(|addrs| addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {host}")))
    }
}

/// SSRF guard.
///
/// Stateless apart from its resolver: each check is computed from current
/// DNS, so a previous `Allow` says nothing about the next call.
#[derive(Clone)]
pub struct SsrfGuard {
    resolver: Arc<dyn Resolver>,
    resolve_timeout: Duration,
}

impl std::fmt::Debug for SsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrfGuard")
            .field("resolve_timeout", &self.resolve_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for SsrfGuard {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVE_TIMEOUT)
    }
}

impl SsrfGuard {
    /// Guard using the system resolver
    #[must_use]
    pub fn new(resolve_timeout: Duration) -> Self {
        Self::with_resolver(Arc::new(SystemResolver), resolve_timeout)
    }

    /// Guard using a custom resolver
    #[must_use]
    pub fn with_resolver(resolver: Arc<dyn Resolver>, resolve_timeout: Duration) -> Self {
        Self {
            resolver,
            resolve_timeout,
        }
    }

    /// Returns `true` only if `candidate` passed every check.
    ///
    /// Never fails: parse errors, lookup errors and timeouts are all `false`.
    pub async fn is_safe_url(&self, candidate: &str) -> bool {
        self.verdict(candidate).await.is_allowed()
    }

    /// Compute the verdict for `candidate`.
    pub async fn verdict(&self, candidate: &str) -> Verdict {
        match self.check(candidate).await {
            Ok(_) => Verdict::Allow,
            Err(_) => Verdict::Deny,
        }
    }

    /// Run every check and return the approved target.
    ///
    /// # Errors
    ///
    /// Returns the [`Denial`] that stopped the check. Callers must not
    /// forward it to clients.
    pub async fn check(&self, candidate: &str) -> Result<ApprovedTarget, Denial> {
        let Ok(url) = Url::parse(candidate) else {
            debug!("SSRF check denied: unparsable URL");
            return Err(Denial::UnparsableUrl);
        };
        self.check_url(url).await
    }

    /// Same as [`SsrfGuard::check`] for an already-parsed URL.
    ///
    /// # Errors
    ///
    /// Returns the [`Denial`] that stopped the check.
    pub async fn check_url(&self, url: Url) -> Result<ApprovedTarget, Denial> {
        match self.evaluate(&url).await {
            Ok(addrs) => {
                debug!(host = ?url.host_str(), addrs = addrs.len(), "SSRF check passed");
                Ok(ApprovedTarget { url, addrs })
            }
            Err(denial) => {
                debug!(reason = %denial, "SSRF check denied");
                Err(denial)
            }
        }
    }

    async fn evaluate(&self, url: &Url) -> Result<Vec<SocketAddr>, Denial> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(Denial::DisallowedScheme(other.to_string())),
        }

        let host_str = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if is_blocked_hostname(&host_str) {
            return Err(Denial::DisallowedHostnameLiteral(host_str));
        }

        let port = url.port_or_known_default().unwrap_or(80);
        let addrs = match url.host() {
            Some(Host::Ipv4(ip)) => vec![SocketAddr::new(IpAddr::V4(ip), port)],
            Some(Host::Ipv6(ip)) => vec![SocketAddr::new(IpAddr::V6(ip), port)],
            Some(Host::Domain(domain)) => self.resolve(domain, port).await?,
            None => return Err(Denial::UnparsableUrl),
        };

        if let Some(addr) = addrs.iter().map(SocketAddr::ip).find(|ip| is_non_public(*ip)) {
            return Err(Denial::PrivateAddressMatch {
                host: host_str,
                addr,
            });
        }

        Ok(addrs)
    }

    async fn resolve(&self, domain: &str, port: u16) -> Result<Vec<SocketAddr>, Denial> {
        let failure = || Denial::ResolutionFailure(domain.to_string());

        match tokio::time::timeout(self.resolve_timeout, self.resolver.resolve(domain, port)).await
        {
            Ok(Ok(addrs)) if !addrs.is_empty() => Ok(addrs),
            Ok(Ok(_)) => Err(failure()),
            Ok(Err(e)) => {
                debug!(host = %domain, error = %e, "Resolution failed");
                Err(failure())
            }
            Err(_) => {
                debug!(host = %domain, timeout = ?self.resolve_timeout, "Resolution timed out");
                Err(failure())
            }
        }
    }
}

/// Hostname literals rejected before any lookup. `host` must be lowercase.
fn is_blocked_hostname(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    host == "localhost"
        || host == "127.0.0.1"
        || host == "0.0.0.0"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
}

/// Check whether an address is private, loopback, or otherwise reserved
/// and must not be the target of an outbound request.
pub fn is_non_public(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(ipv4) => is_non_public_ipv4(ipv4),
        IpAddr::V6(ipv6) => is_non_public_ipv6(ipv6),
    }
}

fn is_non_public_ipv4(addr: Ipv4Addr) -> bool {
    BLOCKED_V4
        .iter()
        .any(|&(network, prefix)| in_cidr(addr, network, prefix))
}

/// Numeric CIDR containment: `addr` lies in `network/prefix`.
fn in_cidr(addr: Ipv4Addr, network: Ipv4Addr, prefix: u32) -> bool {
    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    u32::from(addr) & mask == u32::from(network) & mask
}

fn is_non_public_ipv6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() || addr.is_multicast() {
        return true;
    }

    let segments = addr.segments();

    // Link-local (fe80::/10)
    if segments[0] & 0xFFC0 == 0xFE80 {
        return true;
    }

    // Unique local (fc00::/7)
    if segments[0] & 0xFE00 == 0xFC00 {
        return true;
    }

    // IPv4-mapped (`::ffff:x.x.x.x`), the classic filter bypass
    if let Some(ipv4) = addr.to_ipv4_mapped() {
        return is_non_public_ipv4(ipv4);
    }

    // IPv4-compatible (`::x.x.x.x`, deprecated but still parseable)
    if segments[..6].iter().all(|&s| s == 0) {
        return is_non_public_ipv4(embedded_ipv4(segments[6], segments[7]));
    }

    // NAT64 well-known prefix (64:ff9b::/96)
    if segments[0] == 0x0064 && segments[1] == 0xFF9B && segments[2..6].iter().all(|&s| s == 0) {
        return is_non_public_ipv4(embedded_ipv4(segments[6], segments[7]));
    }

    // 6to4 (2002::/16)
    if segments[0] == 0x2002 {
        return is_non_public_ipv4(embedded_ipv4(segments[1], segments[2]));
    }

    // Teredo (2001:0000::/32), client address stored inverted
    if segments[0] == 0x2001 && segments[1] == 0 {
        let client = !u32::from(embedded_ipv4(segments[6], segments[7]));
        return is_non_public_ipv4(Ipv4Addr::from(client));
    }

    false
}

fn embedded_ipv4(hi: u16, lo: u16) -> Ipv4Addr {
    let [a, b] = hi.to_be_bytes();
    let [c, d] = lo.to_be_bytes();
    Ipv4Addr::new(a, b, c, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn guard_with(resolver: StaticResolver) -> SsrfGuard {
        SsrfGuard::with_resolver(Arc::new(resolver), Duration::from_secs(1))
    }

    fn public_example() -> SsrfGuard {
        guard_with(StaticResolver::new().with_host("example.com", &[ip("93.184.216.34")]))
    }

    // ── address classification ────────────────────────────────────────

    #[test]
    fn ipv4_rfc1918_uses_cidr_containment() {
        assert!(is_non_public(ip("10.0.0.5")));
        assert!(is_non_public(ip("192.168.1.1")));
        assert!(is_non_public(ip("172.16.0.1")));
        assert!(is_non_public(ip("172.31.255.255")));
        // Outside 172.16.0.0/12 despite the "172." prefix
        assert!(!is_non_public(ip("172.15.255.255")));
        assert!(!is_non_public(ip("172.32.0.1")));
    }

    #[test]
    fn ipv4_loopback_and_special() {
        assert!(is_non_public(ip("127.0.0.1")));
        assert!(is_non_public(ip("127.255.255.255")));
        assert!(is_non_public(ip("0.0.0.0")));
        assert!(is_non_public(ip("169.254.169.254")));
        assert!(is_non_public(ip("100.64.0.1")));
        assert!(is_non_public(ip("255.255.255.255")));
        assert!(is_non_public(ip("224.0.0.1")));
    }

    #[test]
    fn ipv4_public_passes() {
        assert!(!is_non_public(ip("8.8.8.8")));
        assert!(!is_non_public(ip("1.1.1.1")));
        assert!(!is_non_public(ip("93.184.216.34")));
        assert!(!is_non_public(ip("100.128.0.1")));
    }

    #[test]
    fn ipv6_private_ranges() {
        assert!(is_non_public(ip("::1")));
        assert!(is_non_public(ip("::")));
        assert!(is_non_public(ip("fe80::1")));
        assert!(is_non_public(ip("fd00::1")));
        assert!(is_non_public(ip("ff02::1")));
    }

    #[test]
    fn ipv6_embedded_ipv4() {
        assert!(is_non_public(ip("::ffff:127.0.0.1")));
        assert!(is_non_public(ip("::ffff:10.0.0.1")));
        assert!(is_non_public(ip("::10.0.0.1")));
        assert!(is_non_public(ip("64:ff9b::192.168.0.1")));
        // 2002:0a00:0001:: embeds 10.0.0.1
        assert!(is_non_public(ip("2002:0a00:0001::")));
        assert!(!is_non_public(ip("::ffff:8.8.8.8")));
        assert!(!is_non_public(ip("2002:0808:0808::")));
    }

    #[test]
    fn ipv6_public_passes() {
        assert!(!is_non_public(ip("2607:f8b0:4004:800::200e")));
    }

    #[test]
    fn blocked_hostname_literals() {
        assert!(is_blocked_hostname("localhost"));
        assert!(is_blocked_hostname("localhost."));
        assert!(is_blocked_hostname("printer.local"));
        assert!(is_blocked_hostname("app.localhost"));
        assert!(!is_blocked_hostname("example.com"));
        assert!(!is_blocked_hostname("localhost.example.com"));
    }

    // ── SsrfGuard ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn denies_localhost() {
        assert!(!public_example().is_safe_url("http://localhost/x").await);
        assert!(!public_example().is_safe_url("http://LOCALHOST./x").await);
    }

    #[tokio::test]
    async fn denies_non_http_schemes() {
        let guard = public_example();
        assert!(!guard.is_safe_url("ftp://example.com").await);
        assert!(!guard.is_safe_url("file:///etc/passwd").await);
        assert!(!guard.is_safe_url("gopher://example.com:70/").await);
        assert_eq!(
            guard.check("ftp://example.com").await.unwrap_err(),
            Denial::DisallowedScheme("ftp".to_string())
        );
    }

    #[tokio::test]
    async fn denies_unparsable() {
        let guard = public_example();
        assert!(!guard.is_safe_url("not a url").await);
        assert_eq!(guard.check("").await.unwrap_err(), Denial::UnparsableUrl);
    }

    #[tokio::test]
    async fn allows_public_resolution() {
        let guard = public_example();
        assert!(guard.is_safe_url("https://example.com").await);

        let target = guard.check("https://example.com/path").await.unwrap();
        assert_eq!(target.addrs, vec![SocketAddr::new(ip("93.184.216.34"), 443)]);
        assert_eq!(target.url.path(), "/path");
    }

    #[tokio::test]
    async fn denies_private_resolution() {
        let guard = guard_with(StaticResolver::new().with_host("example.com", &[ip("10.0.0.5")]));
        assert!(!guard.is_safe_url("https://example.com").await);
        assert_eq!(
            guard.check("https://example.com").await.unwrap_err(),
            Denial::PrivateAddressMatch {
                host: "example.com".to_string(),
                addr: ip("10.0.0.5"),
            }
        );
    }

    #[tokio::test]
    async fn one_private_address_denies_the_whole_url() {
        let guard = guard_with(
            StaticResolver::new()
                .with_host("mixed.example", &[ip("93.184.216.34"), ip("::1")]),
        );
        assert!(!guard.is_safe_url("http://mixed.example/").await);
    }

    #[tokio::test]
    async fn denies_on_resolution_failure() {
        let guard = guard_with(StaticResolver::new().with_host("empty.example", &[]));
        assert!(!guard.is_safe_url("http://unknown.example/").await);
        assert!(!guard.is_safe_url("http://empty.example/").await);
    }

    #[tokio::test]
    async fn denies_local_suffix() {
        assert!(!public_example().is_safe_url("http://nas.local/admin").await);
    }

    #[tokio::test]
    async fn ip_literals_skip_resolution() {
        let guard = guard_with(StaticResolver::new());
        assert!(guard.is_safe_url("http://8.8.8.8/").await);
        assert!(!guard.is_safe_url("http://10.1.2.3/").await);
        assert!(!guard.is_safe_url("http://[::1]/").await);
        assert!(!guard.is_safe_url("http://[::ffff:10.0.0.1]/").await);
        assert!(!guard.is_safe_url("http://172.20.0.1:8080/").await);
    }

    #[tokio::test]
    async fn encoded_ipv4_hosts_are_normalized_first() {
        let guard = guard_with(StaticResolver::new());
        assert!(!guard.is_safe_url("http://0x7f000001/").await);
        assert!(!guard.is_safe_url("http://2130706433/").await);
    }

    struct SlowResolver;

    #[async_trait]
    impl Resolver for SlowResolver {
        async fn resolve(&self, _host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![SocketAddr::new(ip("93.184.216.34"), port)])
        }
    }

    #[tokio::test]
    async fn resolution_timeout_denies() {
        let guard = SsrfGuard::with_resolver(Arc::new(SlowResolver), Duration::from_millis(50));
        assert_eq!(
            guard.check("https://slow.example").await.unwrap_err(),
            Denial::ResolutionFailure("slow.example".to_string())
        );
    }

    /// Answers with a public address once, then a private one.
    struct RebindingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Resolver for RebindingResolver {
        async fn resolve(&self, _host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
            let answer = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ip("93.184.216.34")
            } else {
                ip("127.0.0.1")
            };
            Ok(vec![SocketAddr::new(answer, port)])
        }
    }

    #[tokio::test]
    async fn verdicts_are_not_cached() {
        let guard = SsrfGuard::with_resolver(
            Arc::new(RebindingResolver {
                calls: AtomicUsize::new(0),
            }),
            Duration::from_secs(1),
        );
        assert_eq!(guard.verdict("https://rebind.example").await, Verdict::Allow);
        assert_eq!(guard.verdict("https://rebind.example").await, Verdict::Deny);
    }
}
