// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Data sources consulted by the query engine: zone databases, the cache and the zone table

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::access::Access;
use crate::error::QueryResult;
use crate::proto::rr::{Name, RecordType};
use crate::rdata::Rdataset;

/// A snapshot of a database; lookups against the same version see the same data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DbVersion(pub u64);

/// Options altering a database lookup
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Data below a zone cut (glue) may be returned
    pub glue_ok: bool,
    /// Data which has not been validated may be returned
    pub pending_ok: bool,
}

impl FindOptions {
    /// Allow glue in the result
    pub fn with_glue(mut self) -> Self {
        self.glue_ok = true;
        self
    }
}

/// Outcome of a database lookup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindCode {
    /// Data of the requested type exists at the name
    Success,
    /// Glue data was found below a zone cut
    Glue,
    /// The name is a zone cut and the data was requested with glue allowed
    ZoneCut,
    /// The name is at or below a zone cut; the rdataset holds the delegating NS set
    Delegation,
    /// The name exists but has no data of the requested type
    NxRrset,
    /// The name does not exist
    NxDomain,
    /// A cached statement that the name does not exist
    NcacheNxDomain,
    /// A cached statement that the type does not exist at the name
    NcacheNxRrset,
    /// A CNAME was found instead of the requested type
    Cname,
    /// A DNAME above the name redirects it
    Dname,
    /// The database has no data to offer at all, not even a delegation
    NotFound,
}

/// A successful lookup: what was found and where
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Found {
    /// Classification of the result
    pub code: FindCode,
    /// The name the data belongs to: the zone cut for delegations, the DNAME owner for DNAMEs
    pub name: Name,
}

impl Found {
    /// Creates a lookup result
    pub fn new(code: FindCode, name: Name) -> Self {
        Self { code, name }
    }
}

/// An authoritative zone database or the shared cache
///
/// Lookups fill the caller's rdataset handles rather than returning new ones, so handles can be
///  recycled by the query's pool.
#[async_trait]
pub trait Database: Send + Sync {
    /// Origin of the zone; the root for a cache
    fn origin(&self) -> &Name;

    /// True for the cache
    fn is_cache(&self) -> bool;

    /// True if the zone is signed
    fn is_secure(&self) -> bool;

    /// Opens the current version for reading
    async fn current_version(&self) -> DbVersion;

    /// Closes a version returned by [`Database::current_version`]
    async fn close_version(&self, version: DbVersion);

    /// Looks up `name`/`rtype`, reporting delegations, aliases and negative results
    ///
    /// `version` of `None` reads the latest data. Signatures covering the found data are put in
    ///  `sig_rdataset` when it is given.
    #[allow(clippy::too_many_arguments)]
    async fn find(
        &self,
        name: &Name,
        version: Option<DbVersion>,
        rtype: RecordType,
        options: FindOptions,
        now: u32,
        rdataset: &mut Rdataset,
        sig_rdataset: Option<&mut Rdataset>,
    ) -> QueryResult<Found>;

    /// Every rdataset stored at exactly `name`, signatures included
    async fn all_rdatasets(
        &self,
        name: &Name,
        version: Option<DbVersion>,
        now: u32,
    ) -> QueryResult<Vec<Rdataset>>;

    /// Deepest zone cut at or above `name` known to a cache; `None` if there is none
    async fn find_zonecut(
        &self,
        name: &Name,
        now: u32,
        rdataset: &mut Rdataset,
        sig_rdataset: Option<&mut Rdataset>,
    ) -> QueryResult<Option<Name>>;
}

/// True if both handles refer to the same database
pub fn same_db(a: &Arc<dyn Database>, b: &Arc<dyn Database>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// An authoritative zone: its database and query restrictions
#[derive(Clone)]
pub struct Zone {
    db: Arc<dyn Database>,
    query_acl: Option<Arc<Access>>,
}

impl Zone {
    /// A zone anyone the view admits may query
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            query_acl: None,
        }
    }

    /// Restrict queries to `acl` instead of the view's allow-query list
    pub fn with_query_acl(mut self, acl: Access) -> Self {
        self.query_acl = Some(Arc::new(acl));
        self
    }

    /// The zone origin
    pub fn origin(&self) -> &Name {
        self.db.origin()
    }

    /// The zone database
    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// The zone specific allow-query list
    pub fn query_acl(&self) -> Option<&Arc<Access>> {
        self.query_acl.as_ref()
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("origin", self.origin())
            .field("query_acl", &self.query_acl)
            .finish()
    }
}

/// The set of authoritative zones of a view
pub trait ZoneTable: Send + Sync {
    /// The zone whose origin is the longest match for `name`
    ///
    /// With `no_exact`, a zone whose origin equals `name` is skipped in favour of its parent.
    fn find_zone(&self, name: &Name, no_exact: bool) -> Option<Zone>;
}
