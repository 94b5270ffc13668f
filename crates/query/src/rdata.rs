// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Record data and rdataset handles as seen by the query engine

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Bytes;

use crate::proto::rr::{Name, RecordType};

/// Record types the engine handles that are not part of [`RecordType`]'s named variants
pub trait RecordTypeExt: Copy {
    /// NXT, the pre-NSEC denial of existence record
    fn nxt() -> RecordType {
        RecordType::from(30)
    }

    /// A6, the legacy 128-bit address record
    fn a6() -> RecordType {
        RecordType::from(38)
    }

    /// DNAME, the subtree redirection record
    fn dname() -> RecordType {
        RecordType::from(39)
    }

    /// The numeric value of the type
    fn code(self) -> u16;

    /// True for DNAME
    fn is_dname(self) -> bool {
        self.code() == 39
    }

    /// True for A6
    fn is_a6(self) -> bool {
        self.code() == 38
    }

    /// True for types which only exist for DNSSEC processing
    fn is_dnssec_type(self) -> bool {
        // SIG, KEY, NXT, DS, RRSIG, NSEC, DNSKEY, NSEC3, NSEC3PARAM
        matches!(self.code(), 24 | 25 | 30 | 43 | 46..=48 | 50 | 51)
    }

    /// True for question types that do not name an rrset (ANY, AXFR, OPT, TSIG and friends)
    fn is_meta_type(self) -> bool {
        matches!(self.code(), 41 | 128..=255)
    }

    /// Address record types, which trigger lookups for key data
    fn is_address(self) -> bool {
        matches!(self.code(), 1 | 28 | 38)
    }
}

impl RecordTypeExt for RecordType {
    fn code(self) -> u16 {
        u16::from(self)
    }
}

/// Question types with special meaning in the query path
pub(crate) mod meta {
    pub(crate) const TKEY: u16 = 249;
    pub(crate) const TSIG: u16 = 250;
    pub(crate) const IXFR: u16 = 251;
    pub(crate) const AXFR: u16 = 252;
    pub(crate) const MAILB: u16 = 253;
    pub(crate) const MAILA: u16 = 254;
    pub(crate) const ANY: u16 = 255;
}

/// SOA record data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Soa {
    /// Primary name server
    pub mname: Name,
    /// Responsible mailbox
    pub rname: Name,
    /// Zone serial
    pub serial: u32,
    /// Refresh interval
    pub refresh: i32,
    /// Retry interval
    pub retry: i32,
    /// Expiry
    pub expire: i32,
    /// Negative caching TTL
    pub minimum: u32,
}

/// Record data in the forms the engine needs to interpret
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Rdata {
    /// IPv4 address
    A(Ipv4Addr),
    /// IPv6 address
    Aaaa(Ipv6Addr),
    /// Name server
    Ns(Name),
    /// Canonical name
    Cname(Name),
    /// Subtree redirection target
    Dname(Name),
    /// Start of authority
    Soa(Soa),
    /// Mail exchanger
    Mx {
        /// Preference, lower is better
        preference: u16,
        /// Host name of the exchanger
        exchange: Name,
    },
    /// Service location
    Srv {
        /// Priority, lower is better
        priority: u16,
        /// Weight among equal priorities
        weight: u16,
        /// Port
        port: u16,
        /// Host name of the service
        target: Name,
    },
    /// Any other record data, carried as wire bytes
    Opaque(Bytes),
}

impl Rdata {
    /// The name this record asks the additional-data processor to resolve, if any
    pub fn additional_name(&self) -> Option<&Name> {
        match self {
            Self::Ns(name) => Some(name),
            Self::Mx { exchange, .. } => Some(exchange),
            Self::Srv { target, .. } => Some(target),
            _ => None,
        }
    }

    /// The address carried by an address record
    pub fn ip_addr(&self) -> Option<IpAddr> {
        match self {
            Self::A(v4) => Some(IpAddr::V4(*v4)),
            Self::Aaaa(v6) => Some(IpAddr::V6(*v6)),
            _ => None,
        }
    }

    /// The SOA fields, if this is an SOA
    pub fn as_soa(&self) -> Option<&Soa> {
        match self {
            Self::Soa(soa) => Some(soa),
            _ => None,
        }
    }

    /// The target of a CNAME or DNAME
    pub fn target(&self) -> Option<&Name> {
        match self {
            Self::Cname(name) | Self::Dname(name) => Some(name),
            _ => None,
        }
    }
}

/// How much the data in an rdataset may be believed, lowest first
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Trust {
    /// Received but not yet validated
    #[default]
    Pending,
    /// From the additional section of a response
    Additional,
    /// Glue from a referral
    Glue,
    /// From the answer section of a non-authoritative response
    Answer,
    /// From the authority section of an authoritative response
    AuthAuthority,
    /// From the answer section of an authoritative response or zone data
    AuthAnswer,
    /// Validated by DNSSEC
    Secure,
}

/// A handle to a set of records sharing owner, type and class
///
/// A handle starts out disassociated. Lookups associate it with data; it is disassociated again
///  before being reused for another lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rdataset {
    rr_type: Option<RecordType>,
    covers: Option<RecordType>,
    ttl: u32,
    trust: Trust,
    negative: bool,
    rdata: Vec<Rdata>,
}

impl Rdataset {
    /// Creates an associated rdataset of `rr_type`
    pub fn new(rr_type: RecordType, ttl: u32, rdata: Vec<Rdata>) -> Self {
        Self {
            rr_type: Some(rr_type),
            covers: None,
            ttl,
            trust: Trust::AuthAnswer,
            negative: false,
            rdata,
        }
    }

    /// Creates a signature rdataset covering `covers`
    pub fn signatures(covers: RecordType, ttl: u32, rdata: Vec<Rdata>) -> Self {
        Self {
            covers: Some(covers),
            ..Self::new(RecordType::SIG, ttl, rdata)
        }
    }

    /// Creates a negative cache entry for `rr_type` (ANY for a nonexistent name)
    pub fn negative(rr_type: RecordType, ttl: u32) -> Self {
        Self {
            negative: true,
            trust: Trust::Answer,
            ..Self::new(rr_type, ttl, Vec::new())
        }
    }

    /// Sets the trust level
    pub fn with_trust(mut self, trust: Trust) -> Self {
        self.trust = trust;
        self
    }

    /// Makes this handle refer to the same data as `other`, reusing its storage
    pub fn associate(&mut self, other: &Self) {
        self.clone_from(other);
    }

    /// Drops the association with any data, keeping allocated storage for reuse
    pub fn disassociate(&mut self) {
        self.rr_type = None;
        self.covers = None;
        self.ttl = 0;
        self.trust = Trust::default();
        self.negative = false;
        self.rdata.clear();
    }

    /// True if this handle refers to data
    pub fn is_associated(&self) -> bool {
        self.rr_type.is_some()
    }

    /// The record type, if associated
    pub fn rr_type(&self) -> Option<RecordType> {
        self.rr_type
    }

    /// The type covered by a signature rdataset
    pub fn covers(&self) -> Option<RecordType> {
        self.covers
    }

    /// The time to live
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Overrides the time to live
    pub fn set_ttl(&mut self, ttl: u32) {
        self.ttl = ttl;
    }

    /// The trust level
    pub fn trust(&self) -> Trust {
        self.trust
    }

    /// True for a cached statement of nonexistence
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// The records
    pub fn rdata(&self) -> &[Rdata] {
        &self.rdata
    }

    pub(crate) fn rdata_mut(&mut self) -> &mut Vec<Rdata> {
        &mut self.rdata
    }

    /// The first record, if any
    pub fn first(&self) -> Option<&Rdata> {
        self.rdata.first()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.rdata.len()
    }

    /// True if there are no records
    pub fn is_empty(&self) -> bool {
        self.rdata.is_empty()
    }

    /// Takes the association out of this handle, leaving it disassociated
    pub(crate) fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
