use std::net::{IpAddr, Ipv6Addr};

/// Local addresses are never tracked: loopback, link-local, and unspecified,
/// including their IPv4-mapped IPv6 forms. Subjects that do not parse as an
/// address are not local.
#[must_use]
pub fn is_local_address(subject: &str) -> bool {
    let trimmed = subject.trim();
    // Bracketed IPv6 literals show up in forwarded headers.
    let candidate = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    match candidate.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
            None => v6.is_loopback() || v6.is_unspecified() || is_unicast_link_local(&v6),
        },
        Err(_) => false,
    }
}

// fe80::/10
fn is_unicast_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_addresses_are_detected() {
        for local in [
            "127.0.0.1",
            "127.10.0.1",
            "0.0.0.0",
            "169.254.1.2",
            "::1",
            "::",
            "fe80::1",
            "[::1]",
            "::ffff:127.0.0.1",
            "::ffff:169.254.0.9",
        ] {
            assert!(is_local_address(local), "{local}");
        }
    }

    #[test]
    fn routable_and_invalid_subjects_are_not_local() {
        for remote in ["203.0.113.9", "2001:db8::1", "::ffff:198.51.100.4", "host.tld", ""] {
            assert!(!is_local_address(remote), "{remote}");
        }
    }
}
