// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Choosing the database a name is looked up in

use std::sync::Arc;

use tracing::{debug, info};

use super::context::{Attributes, QueryContext};
use super::QueryEngine;
use crate::access::Access;
use crate::db::{same_db, Database, DbVersion, Zone};
use crate::error::{QueryError, QueryResult};
use crate::proto::rr::Name;

/// Options for database selection
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct SelectOptions {
    /// Skip a zone whose origin is the name itself
    pub(super) no_exact: bool,
    /// Denials are expected, log them at debug
    pub(super) no_log: bool,
}

impl SelectOptions {
    pub(super) fn no_exact() -> Self {
        Self {
            no_exact: true,
            no_log: false,
        }
    }

    pub(super) fn no_log() -> Self {
        Self {
            no_exact: false,
            no_log: true,
        }
    }
}

/// The database chosen for a name
pub(super) struct Selected {
    pub(super) db: Arc<dyn Database>,
    pub(super) zone: Option<Zone>,
    /// The pinned version; `None` for the cache, which is always read at its latest
    pub(super) version: Option<DbVersion>,
}

impl Selected {
    pub(super) fn is_zone(&self) -> bool {
        self.zone.is_some()
    }
}

impl QueryEngine {
    /// The authoritative zone for `name`, with the version this query reads
    ///
    /// `Ok(None)` means no zone of the view contains the name.
    pub(super) async fn get_zone_db(
        &self,
        ctx: &mut QueryContext,
        name: &Name,
        options: SelectOptions,
    ) -> QueryResult<Option<(Zone, DbVersion)>> {
        let Some(zone) = self.zones.find_zone(name, options.no_exact) else {
            return Ok(None);
        };
        let db = zone.db().clone();

        // all authoritative data must come from the zone first consulted
        if !self.config.additional_from_auth {
            match &ctx.authdb {
                Some(authdb) if !same_db(authdb, &db) => {
                    debug!(zone = %zone.origin(), "zone differs from the answering zone");
                    return Err(QueryError::Refused);
                }
                Some(_) => (),
                None => ctx.authdb = Some(db.clone()),
            }
        }

        let (index, opened) = ctx.find_version(&db).await;
        let version = ctx.versions[index].version;

        if !opened {
            // the decision for this database was made when the version was opened
            return if ctx.versions[index].query_ok {
                Ok(Some((zone, version)))
            } else {
                Err(QueryError::Refused)
            };
        }

        let allowed = match zone.query_acl() {
            Some(acl) => self.check_acl(ctx, "query", acl, options),
            None => self.check_view_query_acl(ctx, options),
        };

        if !allowed {
            return Err(QueryError::Refused);
        }

        ctx.versions[index].query_ok = true;
        Ok(Some((zone, version)))
    }

    /// The cache, if this query may use it
    pub(super) fn get_cache_db(
        &self,
        ctx: &mut QueryContext,
        options: SelectOptions,
    ) -> QueryResult<Arc<dyn Database>> {
        if !ctx.has(Attributes::CACHE_OK) {
            return Err(QueryError::Refused);
        }

        let cache = self.cache.clone().ok_or(QueryError::Refused)?;

        if !self.check_view_query_acl(ctx, options) {
            return Err(QueryError::Refused);
        }

        Ok(cache)
    }

    /// The zone for `name` if it may be used, otherwise the cache
    pub(super) async fn get_db(
        &self,
        ctx: &mut QueryContext,
        name: &Name,
        options: SelectOptions,
    ) -> QueryResult<Selected> {
        match self.get_zone_db(ctx, name, options).await {
            Ok(Some((zone, version))) => {
                return Ok(Selected {
                    db: zone.db().clone(),
                    zone: Some(zone),
                    version: Some(version),
                })
            }
            Ok(None) => (),
            Err(e) => debug!(%name, "zone not usable, trying the cache: {e}"),
        }

        let db = self.get_cache_db(ctx, options)?;
        Ok(Selected {
            db,
            zone: None,
            version: None,
        })
    }

    /// The view's allow-query decision, evaluated at most once per query
    fn check_view_query_acl(&self, ctx: &mut QueryContext, options: SelectOptions) -> bool {
        if ctx.has(Attributes::QUERY_OK_VALID) {
            return ctx.has(Attributes::QUERY_OK);
        }

        let allowed = match &self.query_acl {
            Some(acl) => self.check_acl(ctx, "query", acl, options),
            None => true,
        };

        if allowed {
            ctx.attributes.insert(Attributes::QUERY_OK);
        }
        ctx.attributes.insert(Attributes::QUERY_OK_VALID);
        allowed
    }

    pub(super) fn check_acl(
        &self,
        ctx: &QueryContext,
        operation: &'static str,
        acl: &Access,
        options: SelectOptions,
    ) -> bool {
        let allowed = self.acl_evaluator.check(&*ctx.session, acl).is_allow();

        if allowed {
            debug!(peer = %ctx.session.peer(), qname = %ctx.qname, "{operation} approved");
        } else if options.no_log {
            debug!(peer = %ctx.session.peer(), qname = %ctx.qname, "{operation} denied");
        } else {
            info!(peer = %ctx.session.peer(), qname = %ctx.qname, "{operation} denied");
        }

        allowed
    }
}
