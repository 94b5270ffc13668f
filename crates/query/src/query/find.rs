// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The lookup state machine
//!
//! One run of [`QueryEngine::find`] ends with a response, or with the query suspended on a
//!  fetch. A resumed query enters the machine again with the fetch's result.

use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::context::{Attributes, QueryContext};
use super::select::SelectOptions;
use super::{QueryEngine, MAX_RESTARTS};
use crate::config::sort_order_for;
use crate::db::{Database, DbVersion, FindCode, Zone};
use crate::error::QueryError;
use crate::message::{Presence, SectionKind};
use crate::pool::{wire_length, NameBuffer, MAX_NAME_WIRE_LENGTH};
use crate::proto::op::ResponseCode;
use crate::proto::rr::{Name, RecordType};
use crate::rdata::{meta, Rdata, RecordTypeExt, Rdataset};
use crate::resolver::FetchEvent;
use crate::stats::QueryCounter;

/// How the machine is entered
pub(super) enum Entry {
    Start,
    /// The fetch for the given type completed
    Resume(RecordType, FetchEvent),
}

/// How a run of the machine ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Outcome {
    /// The response is complete
    Respond,
    /// A fetch is outstanding
    Suspend,
}

#[derive(Debug)]
enum State {
    /// Choose the database for the current query name
    Restart,
    /// Look the name up
    DbFind,
    /// Classify a lookup result
    Resume(FindCode),
    /// Data was found
    Success(FindCode),
    Delegation,
    NegativeAnswer(FindCode),
    /// A CNAME or DNAME changes the query name
    Rewrite(FindCode),
    Recursing {
        domain: Option<Name>,
        nameservers: Option<Rdataset>,
    },
    AddAuthority,
    Error(QueryError),
    Cleanup,
}

/// A zone delegation held back while the cache is asked for a closer one
struct SavedDelegation {
    db: Arc<dyn Database>,
    name: Name,
    rdataset: Rdataset,
    sig_rdataset: Option<Rdataset>,
}

/// State of one run of the machine, from a start or a resumption to cleanup
struct Pass {
    db: Option<Arc<dyn Database>>,
    zone: Option<Zone>,
    version: Option<DbVersion>,
    authoritative: bool,
    want_restart: bool,
    /// The authority section was filled by a referral or negative answer
    authority_done: bool,
    qtype: RecordType,
    /// The type looked up, ANY when SIG was asked for
    rtype: RecordType,
    fname: Name,
    buffer: Option<NameBuffer>,
    rdataset: Rdataset,
    sig_rdataset: Option<Rdataset>,
    saved: Option<SavedDelegation>,
    eresult: Option<QueryError>,
}

impl Pass {
    fn new(qtype: RecordType) -> Self {
        Self {
            db: None,
            zone: None,
            version: None,
            authoritative: false,
            want_restart: false,
            authority_done: false,
            qtype,
            rtype: lookup_type(qtype),
            fname: Name::root(),
            buffer: None,
            rdataset: Rdataset::default(),
            sig_rdataset: None,
            saved: None,
            eresult: None,
        }
    }

    fn zone_origin(&self) -> Option<&Name> {
        self.zone.as_ref().map(Zone::origin)
    }

    /// Returns the handles of the last lookup to the pool
    fn release_lookup(&mut self, ctx: &mut QueryContext) {
        ctx.release_name(self.buffer.take());
        let rdataset = self.rdataset.take();
        ctx.recycle(rdataset, self.sig_rdataset.take());
    }

    fn release(&mut self, ctx: &mut QueryContext) {
        self.release_lookup(ctx);
        if let Some(saved) = self.saved.take() {
            ctx.recycle(saved.rdataset, saved.sig_rdataset);
        }
    }
}

fn lookup_type(qtype: RecordType) -> RecordType {
    if qtype == RecordType::SIG {
        RecordType::ANY
    } else {
        qtype
    }
}

/// Types that may be asked for in the question but never answered from data
fn check_type(qtype: RecordType) -> Result<(), QueryError> {
    match qtype.code() {
        meta::TKEY => Err(QueryError::NotImplemented(qtype)),
        meta::TSIG => Err(QueryError::format_error("TSIG in question")),
        meta::AXFR | meta::IXFR | meta::MAILA | meta::MAILB => Err(QueryError::Refused),
        _ => Ok(()),
    }
}

impl QueryEngine {
    /// Runs the machine until the response is complete or the query suspends
    pub(super) async fn find(&self, ctx: &mut QueryContext, entry: Entry) -> Outcome {
        let mut pass = Pass::new(ctx.qtype);
        let mut state = match entry {
            Entry::Start => State::Restart,
            Entry::Resume(qtype, event) => self.resume(ctx, &mut pass, qtype, event),
        };

        loop {
            trace!(qname = %ctx.qname, ?state, "query state");
            state = match state {
                State::Restart => self.restart(ctx, &mut pass).await,
                State::DbFind => self.db_find(ctx, &mut pass).await,
                State::Resume(code) => self.classify(ctx, &mut pass, code).await,
                State::Success(code) => self.answer(ctx, &mut pass, code).await,
                State::Delegation => self.delegation(ctx, &mut pass).await,
                State::NegativeAnswer(code) => self.negative_answer(ctx, &mut pass, code).await,
                State::Rewrite(code) => self.rewrite(ctx, &mut pass, code).await,
                State::Recursing {
                    domain,
                    nameservers,
                } => self.recurse(ctx, &pass, domain, nameservers),
                State::AddAuthority => self.add_authority(ctx, &mut pass).await,
                State::Error(error) => {
                    pass.eresult = Some(error);
                    State::Cleanup
                }
                State::Cleanup => match self.cleanup(ctx, &mut pass) {
                    ControlFlow::Continue(state) => state,
                    ControlFlow::Break(outcome) => return outcome,
                },
            };
        }
    }

    fn count(&self, pass: &Pass, counter: QueryCounter) {
        self.stats.increment(counter, pass.zone_origin());
    }

    /// Picks up the result of a fetch; the data came from the cache
    fn resume(
        &self,
        ctx: &mut QueryContext,
        pass: &mut Pass,
        qtype: RecordType,
        event: FetchEvent,
    ) -> State {
        let FetchEvent {
            result,
            db,
            found_name,
            rdataset,
            sig_rdataset,
            ..
        } = event;

        pass.qtype = qtype;
        pass.rtype = lookup_type(qtype);
        pass.db = db;
        pass.fname = found_name;
        pass.rdataset = rdataset;
        pass.sig_rdataset = match sig_rdataset {
            Some(sig_rdataset) if ctx.want_dnssec() => Some(sig_rdataset),
            Some(sig_rdataset) => {
                ctx.pool.put_rdataset(sig_rdataset);
                None
            }
            None => None,
        };

        match result {
            Ok(code) => State::Resume(code),
            Err(e) => {
                debug!(qname = %ctx.qname, "recursion failed: {e}");
                self.count(pass, QueryCounter::Failure);
                State::Error(QueryError::server_failure("recursion failed"))
            }
        }
    }

    async fn restart(&self, ctx: &mut QueryContext, pass: &mut Pass) -> State {
        pass.release(ctx);
        pass.db = None;
        pass.zone = None;
        pass.version = None;
        pass.authority_done = false;

        let qname = ctx.qname.clone();
        match self.get_db(ctx, &qname, SelectOptions::default()).await {
            Ok(selected) => {
                pass.db = Some(selected.db);
                pass.zone = selected.zone;
                pass.version = selected.version;
            }
            Err(e) => {
                self.count(pass, QueryCounter::Failure);
                return State::Error(match e {
                    QueryError::Refused => QueryError::Refused,
                    e => QueryError::server_failure(e.to_string()),
                });
            }
        }

        pass.authoritative = pass.zone.is_some();

        if let Err(e) = check_type(pass.qtype) {
            self.count(pass, QueryCounter::Failure);
            return State::Error(e);
        }
        pass.rtype = lookup_type(pass.qtype);

        State::DbFind
    }

    async fn db_find(&self, ctx: &mut QueryContext, pass: &mut Pass) -> State {
        let Some(db) = pass.db.clone() else {
            return State::Error(QueryError::server_failure("no database selected"));
        };

        pass.release_lookup(ctx);
        match ctx.pool.acquire_name_buffer() {
            Ok(buffer) => pass.buffer = Some(buffer),
            Err(e) => {
                self.count(pass, QueryCounter::Failure);
                return State::Error(e);
            }
        }

        let (mut rdataset, mut sig_rdataset) = ctx.acquire_rdatasets();
        let found = db
            .find(
                &ctx.qname,
                pass.version,
                pass.rtype,
                ctx.find_options,
                ctx.now,
                &mut rdataset,
                sig_rdataset.as_mut(),
            )
            .await;
        pass.rdataset = rdataset;
        pass.sig_rdataset = sig_rdataset;

        let found = match found {
            Ok(found) => found,
            Err(e) => {
                debug!(qname = %ctx.qname, "lookup failed: {e}");
                self.count(pass, QueryCounter::Failure);
                return State::Error(QueryError::server_failure("lookup failed"));
            }
        };
        pass.fname = found.name;

        // an unsigned zone has no KEY at its apex, the parent holds the null KEY
        if found.code == FindCode::NxRrset
            && pass.qtype == RecordType::KEY
            && pass.zone.is_some()
            && !db.is_secure()
            && ctx.qname == *db.origin()
        {
            if let Some((selected, rdataset, sig_rdataset)) = self.find_parent_key(ctx).await {
                pass.release_lookup(ctx);
                pass.db = Some(selected.db);
                pass.zone = selected.zone;
                pass.version = selected.version;
                pass.fname = ctx.qname.clone();
                pass.rdataset = rdataset;
                pass.sig_rdataset = sig_rdataset;
                return State::Resume(FindCode::Success);
            }
        }

        State::Resume(found.code)
    }

    async fn classify(&self, ctx: &mut QueryContext, pass: &mut Pass, code: FindCode) -> State {
        match code {
            FindCode::Success => State::Success(code),
            FindCode::Glue | FindCode::ZoneCut => {
                pass.authoritative = false;
                State::Success(code)
            }
            FindCode::NotFound => self.root_delegation(ctx, pass).await,
            FindCode::Delegation => State::Delegation,
            FindCode::NxRrset
            | FindCode::NxDomain
            | FindCode::NcacheNxDomain
            | FindCode::NcacheNxRrset => State::NegativeAnswer(code),
            FindCode::Cname | FindCode::Dname => State::Rewrite(code),
        }
    }

    /// The cache knows nothing about the name; start from the root
    async fn root_delegation(&self, ctx: &mut QueryContext, pass: &mut Pass) -> State {
        pass.release_lookup(ctx);

        if let Some(hints) = &self.hints {
            let root = Name::root();
            let (mut rdataset, mut sig_rdataset) = ctx.acquire_rdatasets();
            let found = hints
                .find(
                    &root,
                    None,
                    RecordType::NS,
                    ctx.find_options,
                    ctx.now,
                    &mut rdataset,
                    sig_rdataset.as_mut(),
                )
                .await;

            if matches!(found, Ok(ref found) if found.code == FindCode::Success) {
                pass.fname = root;
                pass.rdataset = rdataset;
                pass.sig_rdataset = sig_rdataset;
                return State::Delegation;
            }
            ctx.recycle(rdataset, sig_rdataset);
        }

        if pass.saved.is_some() {
            pass.fname = Name::root();
            return State::Delegation;
        }

        warn!(qname = %ctx.qname, "no root hints");

        // forwarders may still work without hints
        if ctx.has(Attributes::RECURSION_OK) {
            self.count(pass, QueryCounter::Recursion);
            return State::Recursing {
                domain: None,
                nameservers: None,
            };
        }

        self.count(pass, QueryCounter::Failure);
        State::Error(QueryError::server_failure("no root hints"))
    }

    async fn answer(&self, ctx: &mut QueryContext, pass: &mut Pass, code: FindCode) -> State {
        trace!(qname = %ctx.qname, ?code, "answering");
        let Some(db) = pass.db.clone() else {
            return State::Error(QueryError::server_failure("no database selected"));
        };
        let fname = pass.fname.clone();

        if pass.rtype != RecordType::ANY {
            let buffer = pass.buffer.take();
            let rdataset = pass.rdataset.take();
            let sig_rdataset = pass.sig_rdataset.take();

            if let Err(e) = self
                .add_rrset(
                    ctx,
                    &fname,
                    buffer,
                    rdataset,
                    sig_rdataset,
                    SectionKind::Answer,
                )
                .await
            {
                self.count(pass, QueryCounter::Failure);
                return State::Error(e);
            }

            self.count(pass, QueryCounter::Success);
            ctx.attributes.insert(Attributes::ANSWERED);
            return State::AddAuthority;
        }

        let rdatasets = match db.all_rdatasets(&fname, pass.version, ctx.now).await {
            Ok(rdatasets) => rdatasets,
            Err(e) => {
                debug!(qname = %ctx.qname, "could not list rdatasets: {e}");
                self.count(pass, QueryCounter::Failure);
                return State::Error(QueryError::server_failure("could not list rdatasets"));
            }
        };

        let mut buffer = pass.buffer.take();
        let mut added = 0;
        for rdataset in rdatasets {
            let wanted = !rdataset.is_negative()
                && (pass.qtype == RecordType::ANY || rdataset.rr_type() == Some(RecordType::SIG));
            if !wanted {
                continue;
            }

            if let Err(e) = self
                .add_rrset(
                    ctx,
                    &fname,
                    buffer.take(),
                    rdataset,
                    None,
                    SectionKind::Answer,
                )
                .await
            {
                ctx.release_name(buffer);
                self.count(pass, QueryCounter::Failure);
                return State::Error(e);
            }
            added += 1;
        }
        ctx.release_name(buffer);

        if added > 0 {
            self.count(pass, QueryCounter::Success);
            ctx.attributes.insert(Attributes::ANSWERED);
            return State::AddAuthority;
        }

        if pass.qtype != RecordType::SIG {
            self.count(pass, QueryCounter::Failure);
            return State::Error(QueryError::server_failure("no rdatasets at name"));
        }

        // no signatures at the name
        self.count(pass, QueryCounter::NxRrset);
        if let Err(e) = self.add_soa(ctx, &db, pass.version, false).await {
            return State::Error(e);
        }
        pass.authority_done = true;
        State::AddAuthority
    }

    async fn delegation(&self, ctx: &mut QueryContext, pass: &mut Pass) -> State {
        pass.authoritative = false;
        let Some(db) = pass.db.clone() else {
            return State::Error(QueryError::server_failure("no database selected"));
        };

        if pass.zone.is_some() {
            if let (Some(cache), true) = (&self.cache, ctx.has(Attributes::CACHE_OK)) {
                // the cache may hold a delegation below the zone's
                ctx.release_name(pass.buffer.take());
                pass.saved = Some(SavedDelegation {
                    db,
                    name: pass.fname.clone(),
                    rdataset: pass.rdataset.take(),
                    sig_rdataset: pass.sig_rdataset.take(),
                });
                pass.db = Some(cache.clone());
                pass.zone = None;
                pass.version = None;
                return State::DbFind;
            }

            self.count(pass, QueryCounter::Referral);
            return self.add_referral(ctx, pass, Some(db), false).await;
        }

        let mut glue = None;
        if let Some(saved) = pass.saved.take() {
            if saved.name.zone_of(&pass.fname) {
                ctx.recycle(saved.rdataset, saved.sig_rdataset);
            } else {
                trace!(cut = %saved.name, "zone delegation is closer than the cache's");
                pass.release_lookup(ctx);
                pass.fname = saved.name;
                pass.rdataset = saved.rdataset;
                pass.sig_rdataset = saved.sig_rdataset;
            }
            glue = Some(saved.db);
        }

        if ctx.has(Attributes::RECURSION_OK) {
            self.count(pass, QueryCounter::Recursion);

            // the parent's servers are no good for a KEY at the cut
            if pass.qtype == RecordType::KEY {
                pass.release_lookup(ctx);
                return State::Recursing {
                    domain: None,
                    nameservers: None,
                };
            }

            ctx.release_name(pass.buffer.take());
            if let Some(sig_rdataset) = pass.sig_rdataset.take() {
                ctx.pool.put_rdataset(sig_rdataset);
            }
            return State::Recursing {
                domain: Some(pass.fname.clone()),
                nameservers: Some(pass.rdataset.take()),
            };
        }

        self.count(pass, QueryCounter::Referral);
        self.add_referral(ctx, pass, glue, true).await
    }

    /// Puts the delegation in the authority section, its glue in the additional section
    async fn add_referral(
        &self,
        ctx: &mut QueryContext,
        pass: &mut Pass,
        glue: Option<Arc<dyn Database>>,
        cache_glue_ok: bool,
    ) -> State {
        ctx.gluedb = glue.as_ref().map(Arc::downgrade);
        if cache_glue_ok {
            ctx.attributes.insert(Attributes::CACHE_GLUE_OK);
        }

        let fname = pass.fname.clone();
        let result = self
            .add_rrset(
                ctx,
                &fname,
                pass.buffer.take(),
                pass.rdataset.take(),
                pass.sig_rdataset.take(),
                SectionKind::Authority,
            )
            .await;

        ctx.gluedb = None;
        ctx.attributes.remove(Attributes::CACHE_GLUE_OK);

        if let Err(e) = result {
            return State::Error(e);
        }

        pass.authority_done = true;
        State::AddAuthority
    }

    async fn negative_answer(
        &self,
        ctx: &mut QueryContext,
        pass: &mut Pass,
        code: FindCode,
    ) -> State {
        pass.authority_done = true;

        if matches!(code, FindCode::NcacheNxDomain | FindCode::NcacheNxRrset) {
            pass.authoritative = false;
            if code == FindCode::NcacheNxDomain {
                self.count(pass, QueryCounter::NxDomain);
                ctx.response.set_response_code(ResponseCode::NXDomain);
            } else {
                self.count(pass, QueryCounter::NxRrset);
            }

            if let Err(e) = self.add_negative(ctx, pass) {
                return State::Error(e);
            }
            return State::AddAuthority;
        }

        let db = match (&pass.db, &pass.zone) {
            (Some(db), Some(_)) => db.clone(),
            _ => {
                self.count(pass, QueryCounter::Failure);
                return State::Error(QueryError::server_failure(
                    "negative answer outside of a zone",
                ));
            }
        };

        if code == FindCode::NxDomain {
            self.count(pass, QueryCounter::NxDomain);
            // the end of an alias chain; the aliases already answer the question
            if ctx.restarts > 0 {
                pass.release_lookup(ctx);
                return State::Cleanup;
            }
        } else {
            self.count(pass, QueryCounter::NxRrset);
        }

        // the buffer is only kept for the NXT; the SOA owner is written into the pool tail
        let add_nxt = ctx.want_dnssec() && pass.rdataset.is_associated();
        if !add_nxt {
            ctx.release_name(pass.buffer.take());
        }

        let zero_ttl = code == FindCode::NxDomain && pass.qtype == RecordType::SOA;
        if let Err(e) = self.add_soa(ctx, &db, pass.version, zero_ttl).await {
            return State::Error(e);
        }

        if add_nxt {
            let fname = pass.fname.clone();
            if let Err(e) = self
                .add_rrset(
                    ctx,
                    &fname,
                    pass.buffer.take(),
                    pass.rdataset.take(),
                    pass.sig_rdataset.take(),
                    SectionKind::Authority,
                )
                .await
            {
                debug!(name = %fname, "could not add denial of existence: {e}");
            }
        }

        if code == FindCode::NxDomain {
            ctx.response.set_response_code(ResponseCode::NXDomain);
        }

        State::AddAuthority
    }

    /// A cached negative answer goes to the authority section as it is
    fn add_negative(&self, ctx: &mut QueryContext, pass: &mut Pass) -> Result<(), QueryError> {
        let rdataset = pass.rdataset.take();
        let sig_rdataset = pass.sig_rdataset.take();
        let buffer = pass.buffer.take();

        let Some(rtype) = rdataset.rr_type() else {
            ctx.release_name(buffer);
            ctx.recycle(rdataset, sig_rdataset);
            return Ok(());
        };

        let authority = ctx.response.section(SectionKind::Authority);
        let index = match authority.presence(&pass.fname, rtype, rdataset.covers()) {
            Presence::Rdataset => {
                ctx.release_name(buffer);
                ctx.recycle(rdataset, sig_rdataset);
                return Ok(());
            }
            Presence::Name(index) => {
                ctx.release_name(buffer);
                index
            }
            Presence::Absent => {
                let kept = ctx.keep_name(buffer, &pass.fname)?;
                ctx.response
                    .section_mut(SectionKind::Authority)
                    .add_name(kept)
            }
        };

        ctx.response
            .section_mut(SectionKind::Authority)
            .add_rdataset(index, rdataset);
        if let Some(sig_rdataset) = sig_rdataset {
            ctx.pool.put_rdataset(sig_rdataset);
        }

        Ok(())
    }

    async fn rewrite(&self, ctx: &mut QueryContext, pass: &mut Pass, code: FindCode) -> State {
        let fname = pass.fname.clone();
        let rdataset = pass.rdataset.take();
        let ttl = rdataset.ttl();
        let target = rdataset.first().and_then(Rdata::target).cloned();

        if let Err(e) = self
            .add_rrset(
                ctx,
                &fname,
                pass.buffer.take(),
                rdataset,
                pass.sig_rdataset.take(),
                SectionKind::Answer,
            )
            .await
        {
            return State::Error(e);
        }
        ctx.attributes.insert(Attributes::PARTIAL_ANSWER);

        let Some(target) = target else {
            return State::Error(QueryError::server_failure("alias without a target"));
        };

        if code == FindCode::Cname {
            trace!(qname = %ctx.qname, %target, "following CNAME");
            ctx.qname = target;
            pass.want_restart = true;
            return State::AddAuthority;
        }

        // DNAME: replace the suffix matching the owner with the target
        let qname = ctx.qname.clone();
        let prefix_labels = qname
            .iter()
            .count()
            .saturating_sub(fname.iter().count());
        let prefix = qname.iter().take(prefix_labels).collect::<Vec<_>>();

        let length = prefix.iter().map(|label| label.len() + 1).sum::<usize>()
            + wire_length(&target);
        if length > MAX_NAME_WIRE_LENGTH {
            debug!(%qname, %target, "DNAME substitution is too long");
            ctx.response
                .set_response_code(QueryError::NameTooLong.response_code());
            return State::Cleanup;
        }

        let synthesized = match Name::from_labels(prefix.into_iter().chain(target.iter())) {
            Ok(name) => name,
            Err(e) => {
                debug!(%qname, %target, "DNAME substitution failed: {e}");
                return State::Error(QueryError::server_failure("DNAME substitution failed"));
            }
        };

        if let Err(e) = self.add_cname(ctx, &qname, synthesized.clone(), ttl).await {
            return State::Error(e);
        }

        trace!(%qname, %synthesized, "following DNAME");
        ctx.qname = synthesized;
        pass.want_restart = true;
        State::AddAuthority
    }

    fn recurse(
        &self,
        ctx: &mut QueryContext,
        pass: &Pass,
        domain: Option<Name>,
        nameservers: Option<Rdataset>,
    ) -> State {
        match self.start_recursion(ctx, pass.qtype, domain, nameservers) {
            Ok(()) => State::Cleanup,
            Err(e) => {
                debug!(qname = %ctx.qname, "could not recurse: {e}");
                self.count(pass, QueryCounter::Failure);
                State::Error(QueryError::server_failure("recursion failed"))
            }
        }
    }

    async fn add_authority(&self, ctx: &mut QueryContext, pass: &mut Pass) -> State {
        if pass.want_restart || pass.authority_done {
            return State::Cleanup;
        }

        let Some(db) = pass.db.clone() else {
            return State::Cleanup;
        };

        if pass.zone.is_some() {
            // an NS question at the apex already has the NS set in the answer
            if !(pass.qtype == RecordType::NS && ctx.qname == *db.origin()) {
                if let Err(e) = self.add_ns(ctx, &db, pass.version).await {
                    debug!(zone = %db.origin(), "no authority data: {e}");
                }
            }
        } else if pass.qtype != RecordType::NS {
            self.add_best_ns(ctx).await;
        }

        State::Cleanup
    }

    fn cleanup(&self, ctx: &mut QueryContext, pass: &mut Pass) -> ControlFlow<Outcome, State> {
        pass.release(ctx);

        if ctx.restarts == 0 && !pass.authoritative {
            ctx.response.set_authoritative(false);
        }

        if pass.want_restart {
            pass.want_restart = false;
            if ctx.restarts < MAX_RESTARTS {
                ctx.restarts += 1;
                return ControlFlow::Continue(State::Restart);
            }

            debug!(qname = %ctx.original_qname, "too many restarts");
            self.count(pass, QueryCounter::Failure);
            pass.eresult
                .get_or_insert(QueryError::server_failure("too many restarts"));
        }

        if let Some(error) = pass.eresult.take() {
            if !ctx.has(Attributes::PARTIAL_ANSWER) || ctx.has(Attributes::WANT_RECURSION) {
                debug!(qname = %ctx.original_qname, "query failed: {error}");
                ctx.response.clear_sections();
                ctx.response.set_authoritative(false);
                ctx.response.set_response_code(error.response_code());
                return ControlFlow::Break(Outcome::Respond);
            }

            debug!(qname = %ctx.original_qname, "partial answer: {error}");
            ctx.response.set_response_code(error.response_code());
        }

        if ctx.has(Attributes::RECURSING) {
            return ControlFlow::Break(Outcome::Suspend);
        }

        if let Some(order) = sort_order_for(&self.config.sortlist, ctx.session.peer().ip()) {
            ctx.response.set_sort_order(order);
        }

        if ctx.response.response_code() == ResponseCode::NXDomain && self.config.auth_nxdomain {
            ctx.response.set_authoritative(true);
        }

        ControlFlow::Break(Outcome::Respond)
    }
}
