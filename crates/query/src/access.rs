// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Address match lists and their evaluation against a client session

use std::fmt;
use std::net::IpAddr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use prefix_trie::PrefixSet;

use crate::session::Session;

/// A list of networks whose members are granted access
///
/// [`Access::default`] admits every address, and inserting into it restricts only the family
///  of the inserted network. A list built with [`Access::from_networks`] or [`Access::deny_all`]
///  admits only the networks inserted, so a list of IPv4 networks denies every IPv6 client.
#[derive(Default)]
pub struct Access {
    allow_ipv4: Option<PrefixSet<Ipv4Net>>,
    allow_ipv6: Option<PrefixSet<Ipv6Net>>,
}

impl Access {
    /// A list admitting exactly the given networks, of either family
    pub fn from_networks(networks: impl IntoIterator<Item = IpNet>) -> Self {
        let mut access = Self::deny_all();
        for network in networks {
            access.insert(network);
        }
        access
    }

    /// A list admitting nobody
    pub fn deny_all() -> Self {
        Self {
            allow_ipv4: Some(PrefixSet::default()),
            allow_ipv6: Some(PrefixSet::default()),
        }
    }

    /// Insert a new network that is allowed access
    pub fn insert(&mut self, network: IpNet) {
        match network {
            IpNet::V4(v4) => {
                self.allow_ipv4.get_or_insert_with(PrefixSet::default).insert(v4);
            }
            IpNet::V6(v6) => {
                self.allow_ipv6.get_or_insert_with(PrefixSet::default).insert(v6);
            }
        }
    }

    /// True if `ip` falls within an allowed network
    pub fn allows(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self
                .allow_ipv4
                .as_ref()
                .map_or(true, |allow| allow.get_lpm(&Ipv4Net::from(v4)).is_some()),
            IpAddr::V6(v6) => self
                .allow_ipv6
                .as_ref()
                .map_or(true, |allow| allow.get_lpm(&Ipv6Net::from(v6)).is_some()),
        }
    }
}

impl fmt::Debug for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Access")
            .field("restricts_ipv4", &self.allow_ipv4.is_some())
            .field("restricts_ipv6", &self.allow_ipv6.is_some())
            .finish()
    }
}

/// Outcome of an access check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AclDecision {
    /// Access granted
    Allow,
    /// Access denied
    Deny,
}

impl AclDecision {
    /// True for [`AclDecision::Allow`]
    pub fn is_allow(self) -> bool {
        self == Self::Allow
    }
}

/// Evaluates an address match list for a client
pub trait AclEvaluator: Send + Sync {
    /// Decides whether `session` matches `acl`
    fn check(&self, session: &dyn Session, acl: &Access) -> AclDecision;
}

/// Matches the session's peer address against the list
#[derive(Clone, Copy, Debug, Default)]
pub struct PeerAddressEvaluator;

impl AclEvaluator for PeerAddressEvaluator {
    fn check(&self, session: &dyn Session, acl: &Access) -> AclDecision {
        if acl.allows(session.peer().ip()) {
            AclDecision::Allow
        } else {
            AclDecision::Deny
        }
    }
}
