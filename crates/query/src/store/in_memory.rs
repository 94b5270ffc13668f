// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Zone and cache databases held entirely in memory

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::db::{Database, DbVersion, FindCode, FindOptions, Found};
use crate::error::{QueryError, QueryResult};
use crate::proto::rr::{Name, RecordType};
use crate::rdata::{RecordTypeExt, Rdataset, Trust};

/// All rdatasets of one version, by owner name in canonical order
type Records = BTreeMap<Name, Vec<Rdataset>>;

struct InnerInMemory {
    serial: u64,
    /// The latest version and every older one still open
    versions: BTreeMap<u64, Arc<Records>>,
    /// Open handles per version
    open: HashMap<u64, usize>,
}

impl InnerInMemory {
    fn latest(&self) -> Arc<Records> {
        self.versions.get(&self.serial).cloned().unwrap_or_default()
    }

    fn snapshot(&self, version: Option<DbVersion>) -> Arc<Records> {
        version
            .and_then(|DbVersion(serial)| self.versions.get(&serial).cloned())
            .unwrap_or_else(|| self.latest())
    }

    /// Makes `records` the latest version
    fn commit(&mut self, records: Records) -> DbVersion {
        let previous = self.serial;
        self.serial += 1;
        self.versions.insert(self.serial, Arc::new(records));

        if !self.open.contains_key(&previous) {
            self.versions.remove(&previous);
        }

        DbVersion(self.serial)
    }
}

/// A zone or cache database kept in memory
///
/// Every change creates a new version; readers holding an older version keep seeing the data as
///  it was when they opened it. Wildcards are not expanded.
pub struct InMemoryDatabase {
    origin: Name,
    cache: bool,
    secure: bool,
    inner: RwLock<InnerInMemory>,
}

impl InMemoryDatabase {
    fn new(origin: Name, cache: bool) -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(1, Arc::new(Records::new()));

        Self {
            origin,
            cache,
            secure: false,
            inner: RwLock::new(InnerInMemory {
                serial: 1,
                versions,
                open: HashMap::new(),
            }),
        }
    }

    /// An empty authoritative zone
    pub fn zone(origin: Name) -> Self {
        Self::new(origin, false)
    }

    /// An empty cache
    pub fn cache() -> Self {
        Self::new(Name::root(), true)
    }

    /// Marks the zone as signed
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Adds `rdataset` at `name` before the database is shared
    pub fn with_rdataset(mut self, name: Name, rdataset: Rdataset) -> Self {
        let inner = self.inner.get_mut();
        let serial = inner.serial;
        if let Some(records) = inner.versions.get_mut(&serial) {
            insert(Arc::make_mut(records), name, rdataset);
        }
        self
    }

    /// Adds or replaces `rdataset` at `name` in a new version
    pub async fn upsert(&self, name: Name, rdataset: Rdataset) -> DbVersion {
        let mut inner = self.inner.write().await;
        let mut records = (*inner.latest()).clone();
        insert(&mut records, name, rdataset);
        let version = inner.commit(records);
        debug!(origin = %self.origin, ?version, "upserted");
        version
    }

    /// Removes the rdataset of `rtype` at `name` in a new version
    pub async fn remove(&self, name: &Name, rtype: RecordType) -> DbVersion {
        let mut inner = self.inner.write().await;
        let mut records = (*inner.latest()).clone();
        if let Some(node) = records.get_mut(name) {
            node.retain(|rdataset| {
                rdataset.rr_type() != Some(rtype) || rdataset.covers().is_some()
            });
            if node.is_empty() {
                records.remove(name);
            }
        }
        inner.commit(records)
    }

    /// Number of versions opened and not yet closed
    pub async fn open_versions(&self) -> usize {
        self.inner.read().await.open.values().sum()
    }

    async fn snapshot(&self, version: Option<DbVersion>) -> Arc<Records> {
        self.inner.read().await.snapshot(version)
    }

    fn find_in_zone(
        &self,
        records: &Records,
        name: &Name,
        rtype: RecordType,
        options: FindOptions,
        rdataset: &mut Rdataset,
        sig_rdataset: Option<&mut Rdataset>,
    ) -> QueryResult<Found> {
        if !self.origin.zone_of(name) {
            return Err(QueryError::server_failure(format!(
                "{name} is not in zone {}",
                self.origin
            )));
        }

        let origin_labels = self.origin.iter().count();
        let name_labels = name.iter().count();
        let mut glue_cut: Option<(Name, &Rdataset)> = None;

        // walk down from the origin looking for delegations and DNAMEs above the name
        for depth in origin_labels..=name_labels {
            let node_name = name.trim_to(depth);
            let Some(node) = records.get(&node_name) else {
                continue;
            };
            let at_name = depth == name_labels;

            if depth > origin_labels && glue_cut.is_none() {
                if let Some(ns) = positive(node, RecordType::NS) {
                    // the parent side of a cut holds its KEY and NXT
                    let parent_data = at_name
                        && (rtype == RecordType::KEY || rtype == RecordType::nxt());

                    if !parent_data {
                        if !options.glue_ok {
                            return Ok(associate(
                                node,
                                ns,
                                FindCode::Delegation,
                                node_name,
                                rdataset,
                                sig_rdataset,
                            ));
                        }

                        if at_name {
                            return Ok(match positive(node, rtype) {
                                Some(data) => associate(
                                    node,
                                    data,
                                    FindCode::ZoneCut,
                                    node_name,
                                    rdataset,
                                    sig_rdataset,
                                ),
                                None => associate(
                                    node,
                                    ns,
                                    FindCode::Delegation,
                                    node_name,
                                    rdataset,
                                    sig_rdataset,
                                ),
                            });
                        }

                        glue_cut = Some((node_name, ns));
                        continue;
                    }
                }
            }

            if !at_name && glue_cut.is_none() {
                if let Some(dname) = positive(node, RecordType::dname()) {
                    return Ok(associate(
                        node,
                        dname,
                        FindCode::Dname,
                        node_name,
                        rdataset,
                        sig_rdataset,
                    ));
                }
            }
        }

        let node = records.get(name).filter(|node| !node.is_empty());
        let Some(node) = node else {
            if let Some((cut, ns)) = glue_cut {
                rdataset.associate(ns);
                return Ok(Found::new(FindCode::Delegation, cut));
            }

            if has_descendants(records, name) {
                return Ok(Found::new(FindCode::NxRrset, name.clone()));
            }

            // the NXT of the closest name before this one proves it does not exist
            let covering = records
                .range(..name.clone())
                .rev()
                .find_map(|(owner, node)| {
                    positive(node, RecordType::nxt()).map(|nxt| (owner, node, nxt))
                });

            return Ok(match covering {
                Some((owner, node, nxt)) => associate(
                    node,
                    nxt,
                    FindCode::NxDomain,
                    owner.clone(),
                    rdataset,
                    sig_rdataset,
                ),
                None => Found::new(FindCode::NxDomain, name.clone()),
            });
        };

        if rtype == RecordType::ANY {
            return Ok(Found::new(FindCode::Success, name.clone()));
        }

        if let Some(data) = positive(node, rtype) {
            let code = if glue_cut.is_some() {
                FindCode::Glue
            } else {
                FindCode::Success
            };
            return Ok(associate(node, data, code, name.clone(), rdataset, sig_rdataset));
        }

        if let Some((cut, ns)) = glue_cut {
            rdataset.associate(ns);
            return Ok(Found::new(FindCode::Delegation, cut));
        }

        if rtype != RecordType::CNAME {
            if let Some(cname) = positive(node, RecordType::CNAME) {
                return Ok(associate(
                    node,
                    cname,
                    FindCode::Cname,
                    name.clone(),
                    rdataset,
                    sig_rdataset,
                ));
            }
        }

        Ok(match positive(node, RecordType::nxt()) {
            Some(nxt) => associate(
                node,
                nxt,
                FindCode::NxRrset,
                name.clone(),
                rdataset,
                sig_rdataset,
            ),
            None => Found::new(FindCode::NxRrset, name.clone()),
        })
    }

    fn find_in_cache(
        &self,
        records: &Records,
        name: &Name,
        rtype: RecordType,
        options: FindOptions,
        rdataset: &mut Rdataset,
        sig_rdataset: Option<&mut Rdataset>,
    ) -> Found {
        let usable = |data: &&Rdataset| options.pending_ok || data.trust() != Trust::Pending;
        let name_labels = name.iter().count();

        for depth in 1..name_labels {
            let node_name = name.trim_to(depth);
            if let Some(node) = records.get(&node_name) {
                if let Some(dname) = positive(node, RecordType::dname()).filter(usable) {
                    return associate(
                        node,
                        dname,
                        FindCode::Dname,
                        node_name,
                        rdataset,
                        sig_rdataset,
                    );
                }
            }
        }

        if let Some(node) = records.get(name) {
            if let Some(negative) = negative(node, RecordType::ANY) {
                rdataset.associate(negative);
                return Found::new(FindCode::NcacheNxDomain, name.clone());
            }

            if rtype == RecordType::ANY && node.iter().any(|data| !data.is_negative()) {
                return Found::new(FindCode::Success, name.clone());
            }

            if let Some(data) = positive(node, rtype).filter(usable) {
                return associate(
                    node,
                    data,
                    FindCode::Success,
                    name.clone(),
                    rdataset,
                    sig_rdataset,
                );
            }

            if let Some(negative) = negative(node, rtype) {
                rdataset.associate(negative);
                return Found::new(FindCode::NcacheNxRrset, name.clone());
            }

            if rtype != RecordType::CNAME {
                if let Some(cname) = positive(node, RecordType::CNAME).filter(usable) {
                    return associate(
                        node,
                        cname,
                        FindCode::Cname,
                        name.clone(),
                        rdataset,
                        sig_rdataset,
                    );
                }
            }
        }

        match deepest_cut(records, name, options.pending_ok) {
            Some((cut, node, ns)) => {
                associate(node, ns, FindCode::Delegation, cut, rdataset, sig_rdataset)
            }
            None => Found::new(FindCode::NotFound, name.clone()),
        }
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    fn origin(&self) -> &Name {
        &self.origin
    }

    fn is_cache(&self) -> bool {
        self.cache
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    async fn current_version(&self) -> DbVersion {
        let mut inner = self.inner.write().await;
        let serial = inner.serial;
        *inner.open.entry(serial).or_default() += 1;
        DbVersion(serial)
    }

    async fn close_version(&self, version: DbVersion) {
        let mut inner = self.inner.write().await;
        let DbVersion(serial) = version;

        let Some(count) = inner.open.get_mut(&serial) else {
            debug!(origin = %self.origin, ?version, "closing a version that is not open");
            return;
        };

        *count -= 1;
        if *count == 0 {
            inner.open.remove(&serial);
            if serial != inner.serial {
                inner.versions.remove(&serial);
            }
        }
    }

    async fn find(
        &self,
        name: &Name,
        version: Option<DbVersion>,
        rtype: RecordType,
        options: FindOptions,
        _now: u32,
        rdataset: &mut Rdataset,
        sig_rdataset: Option<&mut Rdataset>,
    ) -> QueryResult<Found> {
        let records = self.snapshot(version).await;

        let found = if self.cache {
            self.find_in_cache(&records, name, rtype, options, rdataset, sig_rdataset)
        } else {
            self.find_in_zone(&records, name, rtype, options, rdataset, sig_rdataset)?
        };

        trace!(origin = %self.origin, %name, ?rtype, ?found, "find");
        Ok(found)
    }

    async fn all_rdatasets(
        &self,
        name: &Name,
        version: Option<DbVersion>,
        _now: u32,
    ) -> QueryResult<Vec<Rdataset>> {
        let records = self.snapshot(version).await;
        Ok(records
            .get(name)
            .map(|node| {
                node.iter()
                    .filter(|data| !data.is_negative())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_zonecut(
        &self,
        name: &Name,
        _now: u32,
        rdataset: &mut Rdataset,
        sig_rdataset: Option<&mut Rdataset>,
    ) -> QueryResult<Option<Name>> {
        if !self.cache {
            return Err(QueryError::server_failure("zone cuts are only searched in a cache"));
        }

        let records = self.snapshot(None).await;
        Ok(deepest_cut(&records, name, false).map(|(cut, node, ns)| {
            associate(node, ns, FindCode::Delegation, cut, rdataset, sig_rdataset).name
        }))
    }
}

fn insert(records: &mut Records, name: Name, rdataset: Rdataset) {
    let node = records.entry(name).or_default();
    node.retain(|existing| {
        existing.rr_type() != rdataset.rr_type() || existing.covers() != rdataset.covers()
    });
    node.push(rdataset);
}

/// Data of `rtype` at a node, signatures excluded
fn positive(node: &[Rdataset], rtype: RecordType) -> Option<&Rdataset> {
    node.iter().find(|data| {
        !data.is_negative() && data.rr_type() == Some(rtype) && data.covers().is_none()
    })
}

fn negative(node: &[Rdataset], rtype: RecordType) -> Option<&Rdataset> {
    node.iter()
        .find(|data| data.is_negative() && data.rr_type() == Some(rtype))
}

/// Associates `data`, and its signatures when asked for
fn associate(
    node: &[Rdataset],
    data: &Rdataset,
    code: FindCode,
    name: Name,
    rdataset: &mut Rdataset,
    sig_rdataset: Option<&mut Rdataset>,
) -> Found {
    rdataset.associate(data);

    if let (Some(sig_rdataset), Some(covered)) = (sig_rdataset, data.rr_type()) {
        if let Some(sigs) = node.iter().find(|sigs| {
            sigs.rr_type() == Some(RecordType::SIG) && sigs.covers() == Some(covered)
        }) {
            sig_rdataset.associate(sigs);
        }
    }

    Found::new(code, name)
}

/// True if some name below `name` exists
fn has_descendants(records: &Records, name: &Name) -> bool {
    records
        .range((Bound::Excluded(name.clone()), Bound::Unbounded))
        .next()
        .is_some_and(|(next, _)| name.zone_of(next))
}

/// The closest NS set at or above `name`
fn deepest_cut<'a>(
    records: &'a Records,
    name: &Name,
    pending_ok: bool,
) -> Option<(Name, &'a [Rdataset], &'a Rdataset)> {
    let labels = name.iter().count();
    (0..=labels).rev().find_map(|depth| {
        let cut = name.trim_to(depth);
        let node = records.get(&cut)?;
        let ns = positive(node, RecordType::NS)
            .filter(|ns| pending_ok || ns.trust() != Trust::Pending)?;
        Some((cut, node.as_slice(), ns))
    })
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::rdata::{Rdata, Soa};

    fn name(name: &str) -> Name {
        Name::from_ascii(name).unwrap()
    }

    fn example() -> InMemoryDatabase {
        InMemoryDatabase::zone(name("example.com."))
            .with_rdataset(
                name("example.com."),
                Rdataset::new(
                    RecordType::SOA,
                    3600,
                    vec![Rdata::Soa(Soa {
                        mname: name("ns1.example.com."),
                        rname: name("hostmaster.example.com."),
                        serial: 1,
                        refresh: 3600,
                        retry: 600,
                        expire: 86400,
                        minimum: 300,
                    })],
                ),
            )
            .with_rdataset(
                name("www.example.com."),
                Rdataset::new(RecordType::A, 300, vec![Rdata::A(Ipv4Addr::new(192, 0, 2, 1))]),
            )
            .with_rdataset(
                name("a.b.example.com."),
                Rdataset::new(RecordType::A, 300, vec![Rdata::A(Ipv4Addr::new(192, 0, 2, 2))]),
            )
            .with_rdataset(
                name("sub.example.com."),
                Rdataset::new(RecordType::NS, 300, vec![Rdata::Ns(name("ns.sub.example.com."))]),
            )
            .with_rdataset(
                name("ns.sub.example.com."),
                Rdataset::new(
                    RecordType::A,
                    300,
                    vec![Rdata::A(Ipv4Addr::new(192, 0, 2, 53))],
                ),
            )
    }

    async fn find(
        db: &InMemoryDatabase,
        qname: &str,
        rtype: RecordType,
        options: FindOptions,
    ) -> (Found, Rdataset) {
        let mut rdataset = Rdataset::default();
        let found = db
            .find(&name(qname), None, rtype, options, 0, &mut rdataset, None)
            .await
            .unwrap();
        (found, rdataset)
    }

    async fn code(
        db: &InMemoryDatabase,
        qname: &str,
        rtype: RecordType,
        options: FindOptions,
    ) -> FindCode {
        find(db, qname, rtype, options).await.0.code
    }

    #[tokio::test]
    async fn test_zone_results() {
        let db = example();
        let none = FindOptions::default();

        assert_eq!(
            code(&db, "www.example.com.", RecordType::A, none).await,
            FindCode::Success
        );
        assert_eq!(
            code(&db, "www.example.com.", RecordType::MX, none).await,
            FindCode::NxRrset
        );
        assert_eq!(
            code(&db, "b.example.com.", RecordType::A, none).await,
            FindCode::NxRrset
        );
        assert_eq!(
            code(&db, "nope.example.com.", RecordType::A, none).await,
            FindCode::NxDomain
        );

        let (found, rdataset) = find(&db, "host.sub.example.com.", RecordType::A, none).await;
        assert_eq!(
            found,
            Found::new(FindCode::Delegation, name("sub.example.com."))
        );
        assert_eq!(rdataset.rr_type(), Some(RecordType::NS));
    }

    #[tokio::test]
    async fn test_glue() {
        let db = example();
        let glue_ok = FindOptions::default().with_glue();
        let (found, rdataset) = find(&db, "ns.sub.example.com.", RecordType::A, glue_ok).await;
        assert_eq!(found.code, FindCode::Glue);
        assert_eq!(rdataset.rr_type(), Some(RecordType::A));
    }

    #[tokio::test]
    async fn test_versions_are_isolated() {
        let db = example();
        let version = db.current_version().await;

        db.upsert(
            name("new.example.com."),
            Rdataset::new(RecordType::A, 60, vec![Rdata::A(Ipv4Addr::LOCALHOST)]),
        )
        .await;

        let mut rdataset = Rdataset::default();
        let pinned = db
            .find(
                &name("new.example.com."),
                Some(version),
                RecordType::A,
                FindOptions::default(),
                0,
                &mut rdataset,
                None,
            )
            .await
            .unwrap();
        assert_eq!(pinned.code, FindCode::NxDomain);
        assert_eq!(
            code(&db, "new.example.com.", RecordType::A, FindOptions::default()).await,
            FindCode::Success
        );

        assert_eq!(db.open_versions().await, 1);
        db.close_version(version).await;
        assert_eq!(db.open_versions().await, 0);
    }

    #[tokio::test]
    async fn test_cache_results() {
        let cache = InMemoryDatabase::cache()
            .with_rdataset(
                name("com."),
                Rdataset::new(
                    RecordType::NS,
                    3600,
                    vec![Rdata::Ns(name("a.gtld-servers.net."))],
                ),
            )
            .with_rdataset(
                name("gone.example.com."),
                Rdataset::negative(RecordType::ANY, 60),
            )
            .with_rdataset(
                name("pending.example.com."),
                Rdataset::new(RecordType::A, 60, vec![Rdata::A(Ipv4Addr::LOCALHOST)])
                    .with_trust(Trust::Pending),
            );
        let none = FindOptions::default();

        assert_eq!(
            code(&cache, "gone.example.com.", RecordType::A, none).await,
            FindCode::NcacheNxDomain
        );
        assert_eq!(
            code(&cache, "www.example.org.", RecordType::A, none).await,
            FindCode::NotFound
        );

        let (found, _) = find(&cache, "pending.example.com.", RecordType::A, none).await;
        assert_eq!(found, Found::new(FindCode::Delegation, name("com.")));
        let pending_ok = FindOptions {
            pending_ok: true,
            ..none
        };
        assert_eq!(
            code(&cache, "pending.example.com.", RecordType::A, pending_ok).await,
            FindCode::Success
        );

        let mut rdataset = Rdataset::default();
        let cut = cache
            .find_zonecut(&name("www.example.com."), 0, &mut rdataset, None)
            .await
            .unwrap();
        assert_eq!(cut, Some(name("com.")));
    }
}
