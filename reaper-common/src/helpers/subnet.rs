use std::net::IpAddr;

/// Derives the /24 block an IPv4 address belongs to, as a CIDR string.
///
/// IPv6 sources are not subnetted: distributed-attack detection only
/// applies to IPv4 address blocks.
pub fn derive_subnet(ip: &str) -> Option<String> {
    match ip.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            Some(format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2]))
        }
        IpAddr::V6(_) => None,
    }
}

/// Ban and list keys are compared case-insensitively; normalize once at
/// every boundary instead of lowercasing on each lookup.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_subnet_ipv4() {
        assert_eq!(
            derive_subnet("203.0.113.77"),
            Some("203.0.113.0/24".to_string())
        );
        assert_eq!(derive_subnet("10.1.2.3"), Some("10.1.2.0/24".to_string()));
    }

    #[test]
    fn test_derive_subnet_ipv6_is_none() {
        assert_eq!(derive_subnet("2001:db8::1"), None);
    }

    #[test]
    fn test_derive_subnet_garbage_is_none() {
        assert_eq!(derive_subnet("-"), None);
        assert_eq!(derive_subnet(""), None);
        assert_eq!(derive_subnet("not-an-ip"), None);
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key(" 2001:DB8::A "), "2001:db8::a");
        assert_eq!(normalize_key("203.0.113.0/24"), "203.0.113.0/24");
    }
}
