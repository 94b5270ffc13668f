// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![allow(dead_code, unreachable_pub)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use hickory_query::access::PeerAddressEvaluator;
use hickory_query::proto::rr::{Name, RecordType};
use hickory_query::resolver::{Fetch, FetchRequest, FetchResponder, Resolver};
use hickory_query::session::Session;
use hickory_query::store::InMemoryDatabase;
use hickory_query::{
    Access, AclDecision, AclEvaluator, Database, DbVersion, FindOptions, Found, QueryError,
    QueryResult, Rdata, Rdataset, RecordTypeExt, Soa,
};

pub fn subscribe() {
    static INSTALL_TRACING_SUBSCRIBER: Once = Once::new();
    INSTALL_TRACING_SUBSCRIBER.call_once(|| {
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).unwrap();
    });
}

pub fn name(name: &str) -> Name {
    Name::from_ascii(name).unwrap()
}

pub fn peer() -> SocketAddr {
    "192.0.2.100:53000".parse().unwrap()
}

pub fn a(ip: [u8; 4]) -> Rdataset {
    Rdataset::new(RecordType::A, 300, vec![Rdata::A(Ipv4Addr::from(ip))])
}

pub fn ns(target: &str) -> Rdataset {
    Rdataset::new(RecordType::NS, 3600, vec![Rdata::Ns(name(target))])
}

pub fn cname(target: &str) -> Rdataset {
    Rdataset::new(RecordType::CNAME, 300, vec![Rdata::Cname(name(target))])
}

pub fn dname(target: &str) -> Rdataset {
    Rdataset::new(RecordType::dname(), 300, vec![Rdata::Dname(name(target))])
}

/// A null key, as a parent holds for an unsigned child
pub fn null_key() -> Rdataset {
    Rdataset::new(
        RecordType::KEY,
        3600,
        vec![Rdata::Opaque(Bytes::from_static(&[0xc1, 0x00, 0x03, 0x05]))],
    )
}

pub fn soa(origin: &str) -> Rdataset {
    Rdataset::new(
        RecordType::SOA,
        3600,
        vec![Rdata::Soa(Soa {
            mname: name(&format!("ns1.{origin}")),
            rname: name(&format!("hostmaster.{origin}")),
            serial: 2002,
            refresh: 3600,
            retry: 600,
            expire: 86400,
            minimum: 300,
        })],
    )
}

/// example.com, delegating sub.example.com
pub fn example_zone() -> InMemoryDatabase {
    InMemoryDatabase::zone(name("example.com."))
        .with_rdataset(name("example.com."), soa("example.com."))
        .with_rdataset(name("example.com."), ns("ns1.example.com."))
        .with_rdataset(name("ns1.example.com."), a([192, 0, 2, 53]))
        .with_rdataset(name("ns1.example.com."), null_key())
        .with_rdataset(name("www.example.com."), a([192, 0, 2, 1]))
        .with_rdataset(name("alias.example.com."), cname("www.example.com."))
        .with_rdataset(name("dangling.example.com."), cname("missing.example.com."))
        .with_rdataset(name("ext.example.com."), cname("host.sub.example.com."))
        .with_rdataset(name("old.example.com."), dname("example.com."))
        .with_rdataset(name("sub.example.com."), ns("ns.sub.example.com."))
        .with_rdataset(name("sub.example.com."), null_key())
        .with_rdataset(name("ns.sub.example.com."), a([192, 0, 2, 54]))
}

/// Counts the versions opened and closed on a database
pub struct CountingDatabase {
    inner: InMemoryDatabase,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl CountingDatabase {
    pub fn new(inner: InMemoryDatabase) -> Self {
        Self {
            inner,
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Database for CountingDatabase {
    fn origin(&self) -> &Name {
        self.inner.origin()
    }

    fn is_cache(&self) -> bool {
        self.inner.is_cache()
    }

    fn is_secure(&self) -> bool {
        self.inner.is_secure()
    }

    async fn current_version(&self) -> DbVersion {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.current_version().await
    }

    async fn close_version(&self, version: DbVersion) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close_version(version).await
    }

    async fn find(
        &self,
        name: &Name,
        version: Option<DbVersion>,
        rtype: RecordType,
        options: FindOptions,
        now: u32,
        rdataset: &mut Rdataset,
        sig_rdataset: Option<&mut Rdataset>,
    ) -> QueryResult<Found> {
        self.inner
            .find(name, version, rtype, options, now, rdataset, sig_rdataset)
            .await
    }

    async fn all_rdatasets(
        &self,
        name: &Name,
        version: Option<DbVersion>,
        now: u32,
    ) -> QueryResult<Vec<Rdataset>> {
        self.inner.all_rdatasets(name, version, now).await
    }

    async fn find_zonecut(
        &self,
        name: &Name,
        now: u32,
        rdataset: &mut Rdataset,
        sig_rdataset: Option<&mut Rdataset>,
    ) -> QueryResult<Option<Name>> {
        self.inner
            .find_zonecut(name, now, rdataset, sig_rdataset)
            .await
    }
}

/// Counts access list evaluations, matching on the peer address
#[derive(Default)]
pub struct CountingEvaluator {
    pub checks: AtomicUsize,
}

impl CountingEvaluator {
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl AclEvaluator for CountingEvaluator {
    fn check(&self, session: &dyn Session, acl: &Access) -> AclDecision {
        self.checks.fetch_add(1, Ordering::SeqCst);
        PeerAddressEvaluator.check(session, acl)
    }
}

/// Hands every fetch to the test, which answers it
pub struct StubResolver {
    requests: mpsc::UnboundedSender<(FetchRequest, FetchResponder)>,
}

impl StubResolver {
    pub fn new() -> (
        Self,
        mpsc::UnboundedReceiver<(FetchRequest, FetchResponder)>,
    ) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (Self { requests }, receiver)
    }
}

impl Resolver for StubResolver {
    fn create_fetch(&self, request: FetchRequest) -> QueryResult<Fetch> {
        let (fetch, responder) = Fetch::new();
        self.requests
            .send((request, responder))
            .map_err(|_| QueryError::server_failure("resolver is gone"))?;
        Ok(fetch)
    }
}

pub fn as_database(db: &Arc<InMemoryDatabase>) -> Arc<dyn Database> {
    db.clone()
}
