// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Additional section processing

use std::collections::VecDeque;

use tracing::{debug, trace};

use super::context::{Attributes, QueryContext};
use super::select::SelectOptions;
use super::QueryEngine;
use crate::db::FindCode;
use crate::message::{Presence, SectionKind};
use crate::proto::rr::{Name, RecordType};
use crate::rdata::{RecordTypeExt, Rdataset, Trust};

impl QueryEngine {
    /// Looks up addresses for `targets` and the key of `owner`
    ///
    /// Every address added is followed by a lookup of the key of its owner. Key lookups add
    ///  nothing further, so the work is bounded by the number of targets.
    pub(super) async fn add_additional_data(
        &self,
        ctx: &mut QueryContext,
        targets: Vec<Name>,
        owner: Option<&Name>,
    ) {
        let mut work = targets
            .into_iter()
            .map(|target| (target, RecordType::A))
            .collect::<VecDeque<_>>();

        if let Some(owner) = owner {
            work.push_back((owner.clone(), RecordType::KEY));
        }

        while let Some((name, rtype)) = work.pop_front() {
            if self.add_additional(ctx, &name, rtype).await {
                work.push_front((name, RecordType::KEY));
            }
        }
    }

    /// Adds `rtype` at `name` to the additional section, A standing for every address type
    ///
    /// Returns true when an A or AAAA rdataset was added.
    async fn add_additional(&self, ctx: &mut QueryContext, name: &Name, rtype: RecordType) -> bool {
        if rtype.is_dnssec_type() && !ctx.want_dnssec() {
            return false;
        }

        let types = if rtype == RecordType::A {
            vec![RecordType::A, RecordType::a6(), RecordType::AAAA]
        } else {
            vec![rtype]
        };

        let mut added_address = false;
        for rtype in types {
            if ctx.response.is_duplicate(name, rtype, None) {
                continue;
            }

            let Some((rdataset, sig_rdataset)) = self.find_additional(ctx, name, rtype).await else {
                continue;
            };

            if self.attach_additional(ctx, name, rdataset, sig_rdataset)
                && matches!(rtype, RecordType::A | RecordType::AAAA)
            {
                added_address = true;
            }
        }

        added_address
    }

    /// Searches the authoritative zone, the cache and then the glue of a referral
    async fn find_additional(
        &self,
        ctx: &mut QueryContext,
        name: &Name,
        rtype: RecordType,
    ) -> Option<(Rdataset, Option<Rdataset>)> {
        let (mut rdataset, mut sig_rdataset) = ctx.acquire_rdatasets();

        if let Ok(Some((zone, version))) = self
            .get_zone_db(ctx, name, SelectOptions::no_log())
            .await
        {
            let found = zone
                .db()
                .find(
                    name,
                    Some(version),
                    rtype,
                    ctx.find_options,
                    ctx.now,
                    &mut rdataset,
                    sig_rdataset.as_mut(),
                )
                .await;

            if matches!(found, Ok(ref found) if found.code == FindCode::Success)
                && rdataset.is_associated()
            {
                trace!(%name, ?rtype, "additional data from zone");
                return Some((rdataset, sig_rdataset));
            }
            clear(&mut rdataset, &mut sig_rdataset);
        }

        if let Ok(cache) = self.get_cache_db(ctx, SelectOptions::no_log()) {
            let found = cache
                .find(
                    name,
                    None,
                    rtype,
                    ctx.find_options,
                    ctx.now,
                    &mut rdataset,
                    sig_rdataset.as_mut(),
                )
                .await;

            // cached glue only serves referrals; anything else, negatives too, tries the glue
            if matches!(found, Ok(ref found) if found.code == FindCode::Success)
                && rdataset.is_associated()
                && (rdataset.trust() > Trust::Glue || ctx.has(Attributes::CACHE_GLUE_OK))
            {
                trace!(%name, ?rtype, "additional data from cache");
                return Some((rdataset, sig_rdataset));
            }
            clear(&mut rdataset, &mut sig_rdataset);
        }

        if let Some(glue_db) = ctx.glue_db() {
            let version = ctx.pinned_version(&glue_db);
            let found = glue_db
                .find(
                    name,
                    version,
                    rtype,
                    ctx.find_options.with_glue(),
                    ctx.now,
                    &mut rdataset,
                    sig_rdataset.as_mut(),
                )
                .await;

            if matches!(
                found.map(|found| found.code),
                Ok(FindCode::Success | FindCode::Glue | FindCode::ZoneCut)
            ) && rdataset.is_associated()
            {
                trace!(%name, ?rtype, "additional data from glue");
                return Some((rdataset, sig_rdataset));
            }
        }

        ctx.recycle(rdataset, sig_rdataset);
        None
    }

    /// Places found data at `name` in the additional section
    fn attach_additional(
        &self,
        ctx: &mut QueryContext,
        name: &Name,
        rdataset: Rdataset,
        sig_rdataset: Option<Rdataset>,
    ) -> bool {
        let Some(rtype) = rdataset.rr_type() else {
            ctx.recycle(rdataset, sig_rdataset);
            return false;
        };

        let index = match ctx
            .response
            .section(SectionKind::Additional)
            .presence(name, rtype, None)
        {
            Presence::Rdataset => {
                ctx.recycle(rdataset, sig_rdataset);
                return false;
            }
            Presence::Name(index) => index,
            Presence::Absent => match ctx.pool.pooled_name(name) {
                Ok(kept) => ctx
                    .response
                    .section_mut(SectionKind::Additional)
                    .add_name(kept),
                Err(e) => {
                    debug!(%name, "no room for additional data: {e}");
                    ctx.recycle(rdataset, sig_rdataset);
                    return false;
                }
            },
        };

        let section = ctx.response.section_mut(SectionKind::Additional);
        section.add_rdataset(index, rdataset);
        match sig_rdataset {
            Some(sig_rdataset) if sig_rdataset.is_associated() => {
                section.add_rdataset(index, sig_rdataset)
            }
            Some(sig_rdataset) => ctx.pool.put_rdataset(sig_rdataset),
            None => (),
        }

        true
    }
}

fn clear(rdataset: &mut Rdataset, sig_rdataset: &mut Option<Rdataset>) {
    rdataset.disassociate();
    if let Some(sig_rdataset) = sig_rdataset {
        sig_rdataset.disassociate();
    }
}
