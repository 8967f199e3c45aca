//! Address Classifier for Node Grains
//!
//! Splits the `ipv4` and `ipv6` grains reported by an agent into the
//! `private_ips` and `public_ips` lists of a normalized node.
//!
//! # Classification Rules
//!
//! Loopback is checked first and dropped from both outputs:
//! `127.0.0.0/8` and `::1`.
//!
//! | Family | Private ranges                                                  |
//! |--------|-----------------------------------------------------------------|
//! | IPv4   | `10.0.0.0/8`, `172.16.0.0/12`, `192.168.0.0/16`, `169.254.0.0/16` |
//! | IPv6   | `fc00::/7` (unique local), `fe80::/10` (link local)             |
//!
//! Everything else is public. Output order follows the IPv4-then-IPv6 input
//! order, and addresses keep the spelling the agent reported.

use crate::error::{ProviderError, ProviderResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Bucket an address falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// Loopback, excluded from both outputs
    Loopback,
    Private,
    Public,
}

/// Result of classifying a node's addresses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedAddresses {
    pub private: Vec<String>,
    pub public: Vec<String>,
}

impl ClassifiedAddresses {
    fn push(&mut self, literal: &str, class: AddressClass) {
        match class {
            AddressClass::Loopback => {}
            AddressClass::Private => self.private.push(literal.to_string()),
            AddressClass::Public => self.public.push(literal.to_string()),
        }
    }
}

/// Classify a single IP literal
///
/// # Errors
///
/// Returns [`ProviderError::InvalidAddress`] if `literal` is not an IPv4 or
/// IPv6 address.
pub fn classify_address(literal: &str) -> ProviderResult<AddressClass> {
    let addr: IpAddr = literal
        .parse()
        .map_err(|_| ProviderError::InvalidAddress(literal.to_string()))?;

    Ok(match addr {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    })
}

fn classify_v4(addr: Ipv4Addr) -> AddressClass {
    if addr.is_loopback() {
        AddressClass::Loopback
    } else if addr.is_private() || addr.is_link_local() {
        AddressClass::Private
    } else {
        AddressClass::Public
    }
}

fn classify_v6(addr: Ipv6Addr) -> AddressClass {
    let first = addr.segments()[0];
    let unique_local = first & 0xfe00 == 0xfc00;
    let link_local = first & 0xffc0 == 0xfe80;

    if addr.is_loopback() {
        AddressClass::Loopback
    } else if unique_local || link_local {
        AddressClass::Private
    } else {
        AddressClass::Public
    }
}

/// Classify the IPv4 and IPv6 grains of a node
///
/// # Errors
///
/// Fails on the first malformed literal with
/// [`ProviderError::InvalidAddress`]; nothing is silently dropped.
pub fn classify<S: AsRef<str>>(ipv4: &[S], ipv6: &[S]) -> ProviderResult<ClassifiedAddresses> {
    let mut out = ClassifiedAddresses::default();
    for literal in ipv4.iter().chain(ipv6.iter()) {
        let literal = literal.as_ref();
        out.push(literal, classify_address(literal)?);
    }
    Ok(out)
}

/// Classify the IPv4 and IPv6 grains of a node, omitting malformed literals
///
/// Used when listing nodes: one agent reporting garbage must not hide the
/// rest of the fleet, so bad literals are logged and skipped.
pub fn classify_lossy<S: AsRef<str>>(node_id: &str, ipv4: &[S], ipv6: &[S]) -> ClassifiedAddresses {
    let mut out = ClassifiedAddresses::default();
    for literal in ipv4.iter().chain(ipv6.iter()) {
        let literal = literal.as_ref();
        match classify_address(literal) {
            Ok(class) => out.push(literal, class),
            Err(e) => tracing::warn!("Omitting address reported by {}: {}", node_id, e),
        }
    }
    out
}
