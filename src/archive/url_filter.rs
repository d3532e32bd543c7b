//! Which URLs are worth archiving automatically.
//!
//! Public archives cannot reach local or private addresses, and browser or
//! inline schemes have nothing to fetch.

use std::net::IpAddr;

use url::{Host, Url};

/// True for http(s) URLs whose host is publicly routable.
pub fn should_auto_archive(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw.trim()) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host() {
        Some(Host::Domain(domain)) => !is_local_name(domain),
        Some(Host::Ipv4(addr)) => is_public(IpAddr::V4(addr)),
        Some(Host::Ipv6(addr)) => is_public(IpAddr::V6(addr)),
        None => false,
    }
}

fn is_local_name(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    domain == "localhost" || domain.ends_with(".localhost")
}

fn is_public(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !(v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public(IpAddr::V4(v4)),
            None => !(v6.is_loopback() || v6.is_unspecified()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_urls() {
        for url in [
            "file:///home/me/paper.pdf",
            "chrome://settings",
            "about:blank",
            "data:text/plain,hello",
            "http://localhost:8080/doc",
            "http://LOCALHOST/doc",
            "http://127.0.0.1/doc",
            "http://10.1.2.3/doc",
            "http://172.16.0.1/doc",
            "http://172.31.255.255/doc",
            "http://192.168.1.10/doc",
            "http://[::1]/doc",
            "ftp://example.org/file",
            "not a url",
        ] {
            assert!(!should_auto_archive(url), "{url} should be skipped");
        }
    }

    #[test]
    fn test_public_urls() {
        for url in [
            "https://example.org/article",
            "http://172.32.0.1/doc",
            "https://doi.org/10.1000/182",
            "https://mirror.example.com/v10.1.2.3/notes",
        ] {
            assert!(should_auto_archive(url), "{url} should be archived");
        }
    }
}
