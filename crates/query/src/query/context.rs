// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::ops::BitOr;
use std::sync::{Arc, Weak};

use time::OffsetDateTime;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

use crate::db::{same_db, Database, DbVersion, FindOptions};
use crate::error::QueryResult;
use crate::message::Response;
use crate::pool::{NameBuffer, PooledName, QueryPool};
use crate::proto::rr::{Name, RecordType};
use crate::rdata::Rdataset;
use crate::resolver::{Fetch, FetchOptions};
use crate::session::Session;

/// Boolean state of a query
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Attributes(u16);

impl Attributes {
    pub(crate) const RECURSION_OK: Self = Self(1);
    pub(crate) const CACHE_OK: Self = Self(1 << 1);
    pub(crate) const RECURSING: Self = Self(1 << 2);
    pub(crate) const PARTIAL_ANSWER: Self = Self(1 << 3);
    pub(crate) const WANT_RECURSION: Self = Self(1 << 4);
    pub(crate) const WANT_DNSSEC: Self = Self(1 << 5);
    pub(crate) const CACHE_GLUE_OK: Self = Self(1 << 6);
    /// The view's allow-query list was evaluated, QUERY_OK holds the outcome
    pub(crate) const QUERY_OK_VALID: Self = Self(1 << 7);
    pub(crate) const QUERY_OK: Self = Self(1 << 8);
    pub(crate) const ANSWERED: Self = Self(1 << 9);

    pub(crate) fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub(crate) fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for Attributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A database version opened by this query, with the memoized access decision
pub(crate) struct ActiveVersion {
    pub(crate) db: Arc<dyn Database>,
    pub(crate) version: DbVersion,
    pub(crate) query_ok: bool,
}

/// The one fetch a recursing query waits for
pub(crate) struct PendingFetch {
    pub(crate) fetch: Fetch,
    pub(crate) qtype: RecordType,
    pub(crate) permit: Option<OwnedSemaphorePermit>,
}

/// Everything one in-flight question owns
pub(crate) struct QueryContext {
    pub(crate) session: Arc<dyn Session>,
    pub(crate) qname: Name,
    pub(crate) original_qname: Name,
    pub(crate) qtype: RecordType,
    pub(crate) restarts: u8,
    pub(crate) attributes: Attributes,
    pub(crate) versions: Vec<ActiveVersion>,
    /// Database of the first zone consulted, when answers may not mix zones
    pub(crate) authdb: Option<Arc<dyn Database>>,
    /// Zone whose glue may be used while a referral is being added
    pub(crate) gluedb: Option<Weak<dyn Database>>,
    pub(crate) fetch: Option<PendingFetch>,
    pub(crate) pool: QueryPool,
    pub(crate) response: Response,
    pub(crate) find_options: FindOptions,
    pub(crate) fetch_options: FetchOptions,
    pub(crate) now: u32,
}

impl QueryContext {
    pub(crate) fn new(
        session: Arc<dyn Session>,
        qname: Name,
        qtype: RecordType,
        pool: QueryPool,
        response: Response,
    ) -> Self {
        Self {
            session,
            original_qname: qname.clone(),
            qname,
            qtype,
            restarts: 0,
            attributes: Attributes::default(),
            versions: Vec::new(),
            authdb: None,
            gluedb: None,
            fetch: None,
            pool,
            response,
            find_options: FindOptions::default(),
            fetch_options: FetchOptions::default(),
            now: now(),
        }
    }

    pub(crate) fn has(&self, attribute: Attributes) -> bool {
        self.attributes.contains(attribute)
    }

    pub(crate) fn want_dnssec(&self) -> bool {
        self.has(Attributes::WANT_DNSSEC)
    }

    /// The version of `db` this query reads, opening it on first use
    ///
    /// Returns the position in the active list and whether the version was just opened.
    pub(crate) async fn find_version(&mut self, db: &Arc<dyn Database>) -> (usize, bool) {
        if let Some(index) = self.versions.iter().position(|v| same_db(&v.db, db)) {
            return (index, false);
        }

        let version = db.current_version().await;
        self.versions.push(ActiveVersion {
            db: db.clone(),
            version,
            query_ok: false,
        });

        (self.versions.len() - 1, true)
    }

    /// The pinned version of `db`, if this query opened one
    pub(crate) fn pinned_version(&self, db: &Arc<dyn Database>) -> Option<DbVersion> {
        self.versions
            .iter()
            .find(|v| same_db(&v.db, db))
            .map(|v| v.version)
    }

    /// Closes every version this query opened; runs once, at the end of the query
    pub(crate) async fn release_versions(&mut self) {
        for active in self.versions.drain(..) {
            active.db.close_version(active.version).await;
        }
        self.authdb = None;
        self.gluedb = None;
    }

    /// Keeps `name` for the response, writing it into `buffer` when one is held
    pub(crate) fn keep_name(
        &mut self,
        buffer: Option<NameBuffer>,
        name: &Name,
    ) -> QueryResult<PooledName> {
        match buffer {
            Some(buffer) => self.pool.keep_name(buffer, name),
            None => self.pool.pooled_name(name),
        }
    }

    pub(crate) fn release_name(&mut self, buffer: Option<NameBuffer>) {
        if let Some(buffer) = buffer {
            self.pool.release_name(buffer);
        }
    }

    /// Returns lookup handles that were not attached to the response
    pub(crate) fn recycle(&mut self, rdataset: Rdataset, sig_rdataset: Option<Rdataset>) {
        self.pool.put_rdataset(rdataset);
        if let Some(sig_rdataset) = sig_rdataset {
            self.pool.put_rdataset(sig_rdataset);
        }
    }

    /// A fresh rdataset handle, and one for signatures when the client wants them
    pub(crate) fn acquire_rdatasets(&mut self) -> (Rdataset, Option<Rdataset>) {
        let rdataset = self.pool.acquire_rdataset();
        let sig_rdataset = self.want_dnssec().then(|| self.pool.acquire_rdataset());
        (rdataset, sig_rdataset)
    }

    pub(crate) fn glue_db(&self) -> Option<Arc<dyn Database>> {
        self.gluedb.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn refresh_now(&mut self) {
        self.now = now();
        debug!(now = self.now, "query clock updated");
    }

    pub(crate) fn take_response(&mut self) -> Response {
        let fresh = Response::empty_like(&self.response);
        std::mem::replace(&mut self.response, fresh)
    }
}

fn now() -> u32 {
    OffsetDateTime::now_utc().unix_timestamp() as u32
}
