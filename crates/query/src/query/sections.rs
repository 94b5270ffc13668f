// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Placing rdatasets in the response

use std::sync::Arc;

use tracing::debug;

use super::context::{Attributes, QueryContext};
use super::select::{SelectOptions, Selected};
use super::QueryEngine;
use crate::db::{Database, DbVersion, FindCode};
use crate::error::{QueryError, QueryResult};
use crate::message::{Presence, SectionKind};
use crate::pool::NameBuffer;
use crate::proto::rr::{Name, RecordType};
use crate::rdata::{Rdata, RecordTypeExt, Rdataset, Trust};

impl QueryEngine {
    /// Adds `rdataset`, and its signatures, at `name` in `section`
    ///
    /// Nothing is added when the section already holds the rdataset. `buffer` is the name
    ///  buffer reserved for `name` when the caller holds one.
    pub(super) async fn add_rrset(
        &self,
        ctx: &mut QueryContext,
        name: &Name,
        buffer: Option<NameBuffer>,
        rdataset: Rdataset,
        sig_rdataset: Option<Rdataset>,
        section: SectionKind,
    ) -> QueryResult<()> {
        let Some(rtype) = rdataset.rr_type() else {
            ctx.release_name(buffer);
            ctx.recycle(rdataset, sig_rdataset);
            return Ok(());
        };

        let index = match ctx
            .response
            .section(section)
            .presence(name, rtype, rdataset.covers())
        {
            Presence::Rdataset => {
                ctx.release_name(buffer);
                ctx.recycle(rdataset, sig_rdataset);
                return Ok(());
            }
            Presence::Name(index) => {
                ctx.release_name(buffer);
                index
            }
            Presence::Absent => match ctx.keep_name(buffer, name) {
                Ok(kept) => ctx.response.section_mut(section).add_name(kept),
                Err(e) => {
                    ctx.recycle(rdataset, sig_rdataset);
                    return Err(e);
                }
            },
        };

        self.add_rdataset(ctx, section, index, name, rdataset).await;

        if let Some(sig_rdataset) = sig_rdataset {
            if sig_rdataset.is_associated() {
                ctx.response
                    .section_mut(section)
                    .add_rdataset(index, sig_rdataset);
            } else {
                ctx.pool.put_rdataset(sig_rdataset);
            }
        }

        Ok(())
    }

    /// Appends `rdataset` to the entry at `index` and looks up the data it asks for
    async fn add_rdataset(
        &self,
        ctx: &mut QueryContext,
        section: SectionKind,
        index: usize,
        owner: &Name,
        rdataset: Rdataset,
    ) {
        let targets = rdataset
            .rdata()
            .iter()
            .filter_map(Rdata::additional_name)
            .cloned()
            .collect::<Vec<_>>();

        let owner_key = rdataset.rr_type().is_some_and(|rtype| {
            rtype.is_address() || matches!(rtype, RecordType::NS | RecordType::SOA)
        });

        ctx.response
            .section_mut(section)
            .add_rdataset(index, rdataset);

        self.add_additional_data(ctx, targets, owner_key.then_some(owner))
            .await;
    }

    /// The zone's SOA in the authority section, its TTL capped at the SOA minimum
    pub(super) async fn add_soa(
        &self,
        ctx: &mut QueryContext,
        db: &Arc<dyn Database>,
        version: Option<DbVersion>,
        zero_ttl: bool,
    ) -> QueryResult<()> {
        let origin = db.origin().clone();
        let (mut rdataset, mut sig_rdataset) = ctx.acquire_rdatasets();

        let found = db
            .find(
                &origin,
                version,
                RecordType::SOA,
                ctx.find_options,
                ctx.now,
                &mut rdataset,
                sig_rdataset.as_mut(),
            )
            .await;

        let minimum = match found {
            Ok(found) if found.code == FindCode::Success => rdataset
                .first()
                .and_then(Rdata::as_soa)
                .map(|soa| soa.minimum),
            _ => None,
        };

        let Some(minimum) = minimum else {
            ctx.recycle(rdataset, sig_rdataset);
            return Err(QueryError::server_failure("zone has no SOA"));
        };

        let ttl = if zero_ttl { 0 } else { rdataset.ttl().min(minimum) };
        rdataset.set_ttl(ttl);
        if let Some(sig_rdataset) = &mut sig_rdataset {
            sig_rdataset.set_ttl(sig_rdataset.ttl().min(ttl));
        }

        self.add_rrset(
            ctx,
            &origin,
            None,
            rdataset,
            sig_rdataset,
            SectionKind::Authority,
        )
        .await
    }

    /// The zone's apex NS set in the authority section
    pub(super) async fn add_ns(
        &self,
        ctx: &mut QueryContext,
        db: &Arc<dyn Database>,
        version: Option<DbVersion>,
    ) -> QueryResult<()> {
        let origin = db.origin().clone();
        let (mut rdataset, mut sig_rdataset) = ctx.acquire_rdatasets();

        let found = db
            .find(
                &origin,
                version,
                RecordType::NS,
                ctx.find_options,
                ctx.now,
                &mut rdataset,
                sig_rdataset.as_mut(),
            )
            .await;

        match found {
            Ok(found) if found.code == FindCode::Success => {
                self.add_rrset(
                    ctx,
                    &origin,
                    None,
                    rdataset,
                    sig_rdataset,
                    SectionKind::Authority,
                )
                .await
            }
            _ => {
                ctx.recycle(rdataset, sig_rdataset);
                Err(QueryError::server_failure("zone has no apex NS"))
            }
        }
    }

    /// A CNAME synthesized from a DNAME, placed in the answer section
    pub(super) async fn add_cname(
        &self,
        ctx: &mut QueryContext,
        owner: &Name,
        target: Name,
        ttl: u32,
    ) -> QueryResult<()> {
        let mut rdataset = ctx.pool.acquire_rdataset();
        rdataset.associate(&Rdataset::new(
            RecordType::CNAME,
            ttl,
            vec![Rdata::Cname(target)],
        ));

        self.add_rrset(ctx, owner, None, rdataset, None, SectionKind::Answer)
            .await
    }

    /// The closest known delegation for the query name in the authority section
    ///
    /// Nothing is added when no delegation can be found; the answer stands without it.
    pub(super) async fn add_best_ns(&self, ctx: &mut QueryContext) {
        let qname = ctx.qname.clone();
        let Ok(selected) = self.get_db(ctx, &qname, SelectOptions::default()).await else {
            return;
        };

        let (mut rdataset, mut sig_rdataset) = ctx.acquire_rdatasets();

        let Some(zone) = &selected.zone else {
            return self
                .add_best_cache_ns(ctx, &qname, &selected.db, rdataset, sig_rdataset, None)
                .await;
        };

        let found = zone
            .db()
            .find(
                &qname,
                selected.version,
                RecordType::NS,
                ctx.find_options,
                ctx.now,
                &mut rdataset,
                sig_rdataset.as_mut(),
            )
            .await;

        let cut = match found {
            Ok(found) if found.code == FindCode::Delegation => found.name,
            _ => {
                ctx.recycle(rdataset, sig_rdataset);
                return;
            }
        };

        match (&self.cache, ctx.has(Attributes::CACHE_OK)) {
            // the cache may know a closer delegation than the zone does
            (Some(cache), true) => {
                let (cache_rdataset, cache_sig) = ctx.acquire_rdatasets();
                self.add_best_cache_ns(
                    ctx,
                    &qname,
                    cache,
                    cache_rdataset,
                    cache_sig,
                    Some((cut, rdataset, sig_rdataset)),
                )
                .await
            }
            _ => self.add_delegation(ctx, &cut, rdataset, sig_rdataset).await,
        }
    }

    async fn add_best_cache_ns(
        &self,
        ctx: &mut QueryContext,
        qname: &Name,
        cache: &Arc<dyn Database>,
        mut rdataset: Rdataset,
        mut sig_rdataset: Option<Rdataset>,
        zone_cut: Option<(Name, Rdataset, Option<Rdataset>)>,
    ) {
        let found = cache
            .find_zonecut(qname, ctx.now, &mut rdataset, sig_rdataset.as_mut())
            .await;

        let (cut, rdataset, sig_rdataset) = match (found, zone_cut) {
            (Ok(Some(cut)), Some(zone_cut)) if !zone_cut.0.zone_of(&cut) => {
                ctx.recycle(rdataset, sig_rdataset);
                zone_cut
            }
            (Ok(Some(cut)), zone_cut) => {
                if let Some((_, zone_rdataset, zone_sig)) = zone_cut {
                    ctx.recycle(zone_rdataset, zone_sig);
                }
                (cut, rdataset, sig_rdataset)
            }
            (_, Some(zone_cut)) => {
                ctx.recycle(rdataset, sig_rdataset);
                zone_cut
            }
            (_, None) => {
                ctx.recycle(rdataset, sig_rdataset);
                return;
            }
        };

        self.add_delegation(ctx, &cut, rdataset, sig_rdataset).await;
    }

    async fn add_delegation(
        &self,
        ctx: &mut QueryContext,
        cut: &Name,
        rdataset: Rdataset,
        sig_rdataset: Option<Rdataset>,
    ) {
        let pending = rdataset.trust() == Trust::Pending
            || sig_rdataset
                .as_ref()
                .is_some_and(|sig| sig.is_associated() && sig.trust() == Trust::Pending);

        if pending && !ctx.find_options.pending_ok {
            debug!(cut = %cut, "skipping unvalidated delegation");
            ctx.recycle(rdataset, sig_rdataset);
            return;
        }

        if let Err(e) = self
            .add_rrset(
                ctx,
                cut,
                None,
                rdataset,
                sig_rdataset,
                SectionKind::Authority,
            )
            .await
        {
            debug!(cut = %cut, "could not add delegation: {e}");
        }
    }

    /// The KEY for the query name held by the parent zone
    ///
    /// The apex of an unsigned zone has no KEY of its own; the parent's null KEY stands in.
    pub(super) async fn find_parent_key(
        &self,
        ctx: &mut QueryContext,
    ) -> Option<(Selected, Rdataset, Option<Rdataset>)> {
        let qname = ctx.qname.clone();
        let selected = self
            .get_db(ctx, &qname, SelectOptions::no_exact())
            .await
            .ok()?;

        if !selected.is_zone() {
            return None;
        }

        let (mut rdataset, mut sig_rdataset) = ctx.acquire_rdatasets();
        let found = selected
            .db
            .find(
                &qname,
                selected.version,
                RecordType::KEY,
                ctx.find_options,
                ctx.now,
                &mut rdataset,
                sig_rdataset.as_mut(),
            )
            .await;

        match found {
            Ok(found) if found.code == FindCode::Success && rdataset.is_associated() => {
                Some((selected, rdataset, sig_rdataset))
            }
            _ => {
                ctx.recycle(rdataset, sig_rdataset);
                None
            }
        }
    }
}
