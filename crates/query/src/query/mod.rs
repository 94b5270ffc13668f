// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The query engine of a view: resolves one question against zones, the cache and the resolver

mod additional;
mod context;
mod find;
mod recursion;
mod sections;
mod select;

use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info};

use self::context::{Attributes, QueryContext};
use self::find::{Entry, Outcome};
use crate::access::{Access, AclEvaluator, PeerAddressEvaluator};
use crate::config::ViewConfig;
use crate::db::{Database, ZoneTable};
use crate::error::{ConfigError, QueryError, QueryResult};
use crate::message::{Request, Response};
use crate::pool::QueryPool;
use crate::proto::op::ResponseCode;
use crate::proto::rr::RecordType;
use crate::rdata::{meta, RecordTypeExt};
use crate::resolver::Resolver;
use crate::session::Session;
use crate::stats::{AtomicQueryStats, QueryStats};

/// Most times one query follows a CNAME or DNAME
pub const MAX_RESTARTS: u8 = 16;

/// Answers questions for one view
///
/// The engine is shared by all queries of the view. Each call to [`QueryEngine::query`] owns its
///  query state until the response is returned.
pub struct QueryEngine {
    config: ViewConfig,
    zones: Arc<dyn ZoneTable>,
    cache: Option<Arc<dyn Database>>,
    hints: Option<Arc<dyn Database>>,
    resolver: Option<Arc<dyn Resolver>>,
    query_acl: Option<Access>,
    recursion_acl: Option<Access>,
    acl_evaluator: Arc<dyn AclEvaluator>,
    stats: Arc<dyn QueryStats>,
    recursion_quota: Arc<Semaphore>,
    conf_lock: Arc<RwLock<()>>,
}

impl QueryEngine {
    /// Starts building an engine for the view configured by `config`, serving `zones`
    pub fn builder(config: ViewConfig, zones: Arc<dyn ZoneTable>) -> QueryEngineBuilder {
        QueryEngineBuilder {
            config,
            zones,
            cache: None,
            hints: None,
            resolver: None,
            acl_evaluator: Arc::new(PeerAddressEvaluator),
            stats: None,
            conf_lock: None,
        }
    }

    /// The view configuration
    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// Lock held for reading while a query runs; take it for writing to reconfigure
    pub fn conf_lock(&self) -> &Arc<RwLock<()>> {
        &self.conf_lock
    }

    /// Recursive client slots not in use
    pub fn available_recursion_slots(&self) -> usize {
        self.recursion_quota.available_permits()
    }

    /// Answers `request`, which arrived on `session`
    ///
    /// Every failure to answer is reported in the response code. `Err` is only returned when
    ///  the query was cancelled while waiting for the resolver; nothing should be sent then.
    pub async fn query(
        &self,
        session: Arc<dyn Session>,
        request: Request,
    ) -> QueryResult<Response> {
        let response = Response::new(&request);

        let question = match request.questions.as_slice() {
            [question] => question.clone(),
            [] => {
                return Ok(error_response(
                    response,
                    QueryError::format_error("no question"),
                ))
            }
            _ => {
                return Ok(error_response(
                    response,
                    QueryError::format_error("more than one question"),
                ))
            }
        };

        if self.config.log_queries {
            info!(
                view = %self.config.name,
                peer = %session.peer(),
                "query: {} {}",
                question.name,
                question.query_type
            );
        }

        if let Err(e) = check_question_type(question.query_type) {
            debug!(peer = %session.peer(), qtype = %question.query_type, "rejected: {e}");
            return Ok(error_response(response, e));
        }

        let mut ctx = QueryContext::new(
            session,
            question.name,
            question.query_type,
            QueryPool::new(&self.config.pool),
            response,
        );
        self.init_attributes(&mut ctx, &request);

        self.run(ctx).await
    }

    fn init_attributes(&self, ctx: &mut QueryContext, request: &Request) {
        if request.recursion_desired {
            ctx.attributes.insert(Attributes::WANT_RECURSION);
        }

        if request.dnssec_ok || request.authentic_data {
            ctx.attributes.insert(Attributes::WANT_DNSSEC);
        }

        let recursion_allowed = self.config.recursion
            && self.resolver.is_some()
            && self.recursion_acl.as_ref().map_or(true, |acl| {
                self.check_acl(ctx, "recursion", acl, select::SelectOptions::default())
            });

        if recursion_allowed && request.recursion_desired {
            ctx.attributes.insert(Attributes::RECURSION_OK);
        }

        if self.cache.is_some() && self.config.additional_from_cache {
            ctx.attributes.insert(Attributes::CACHE_OK);
        } else {
            ctx.attributes
                .remove(Attributes::RECURSION_OK | Attributes::CACHE_OK);
        }

        if request.checking_disabled {
            ctx.find_options.pending_ok = true;
            ctx.fetch_options.no_validate = true;
        }

        ctx.response.set_authoritative(true);
        ctx.response.set_recursion_available(recursion_allowed);
    }

    /// Drives the query until it has a response, waiting on fetches in between
    async fn run(&self, mut ctx: QueryContext) -> QueryResult<Response> {
        let mut entry = Entry::Start;

        loop {
            let outcome = {
                let _conf = self.conf_lock.read().await;
                self.find(&mut ctx, entry).await
            };

            if outcome == Outcome::Respond {
                break;
            }

            let Some(mut pending) = ctx.fetch.take() else {
                error!(qname = %ctx.qname, "query suspended without a fetch");
                ctx.response.clear_sections();
                ctx.response.set_response_code(ResponseCode::ServFail);
                break;
            };

            let event = recursion::wait_for_fetch(&*ctx.session, &mut pending).await;
            match self.complete_recursion(&mut ctx, pending, event) {
                Ok((qtype, event)) => entry = Entry::Resume(qtype, event),
                Err(e) => {
                    ctx.release_versions().await;
                    return Err(e);
                }
            }
        }

        ctx.release_versions().await;
        let response = ctx.take_response();
        debug!(qname = %ctx.original_qname, %response, "query complete");
        Ok(response)
    }
}

/// Meta types other than ANY are not answered here
fn check_question_type(qtype: RecordType) -> QueryResult<()> {
    if !qtype.is_meta_type() {
        return Ok(());
    }

    match qtype.code() {
        meta::ANY => Ok(()),
        // zone transfers and TKEY negotiation are served elsewhere
        meta::AXFR | meta::IXFR | meta::TKEY | meta::MAILA | meta::MAILB => {
            Err(QueryError::NotImplemented(qtype))
        }
        _ => Err(QueryError::format_error("meta type in question")),
    }
}

fn error_response(mut response: Response, error: QueryError) -> Response {
    response.clear_sections();
    response.set_authoritative(false);
    response.set_response_code(error.response_code());
    response
}

/// Builds a [`QueryEngine`]
pub struct QueryEngineBuilder {
    config: ViewConfig,
    zones: Arc<dyn ZoneTable>,
    cache: Option<Arc<dyn Database>>,
    hints: Option<Arc<dyn Database>>,
    resolver: Option<Arc<dyn Resolver>>,
    acl_evaluator: Arc<dyn AclEvaluator>,
    stats: Option<Arc<dyn QueryStats>>,
    conf_lock: Option<Arc<RwLock<()>>>,
}

impl QueryEngineBuilder {
    /// The view's cache
    pub fn cache(mut self, cache: Arc<dyn Database>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Root hints, consulted when the cache knows nothing about a name
    pub fn hints(mut self, hints: Arc<dyn Database>) -> Self {
        self.hints = Some(hints);
        self
    }

    /// The resolver used for recursion
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replaces the peer address matching of access lists
    pub fn acl_evaluator(mut self, acl_evaluator: Arc<dyn AclEvaluator>) -> Self {
        self.acl_evaluator = acl_evaluator;
        self
    }

    /// Where query statistics go, in-process counters by default
    pub fn stats(mut self, stats: Arc<dyn QueryStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Share a configuration lock with other views
    pub fn conf_lock(mut self, conf_lock: Arc<RwLock<()>>) -> Self {
        self.conf_lock = Some(conf_lock);
        self
    }

    /// Validates the configuration and builds the engine
    pub fn build(self) -> Result<QueryEngine, ConfigError> {
        self.config.validate()?;

        Ok(QueryEngine {
            query_acl: self.config.query_acl(),
            recursion_acl: self.config.recursion_acl(),
            recursion_quota: Arc::new(Semaphore::new(self.config.recursive_clients)),
            stats: match self.stats {
                Some(stats) => stats,
                None => Arc::new(AtomicQueryStats::default()),
            },
            conf_lock: self.conf_lock.unwrap_or_default(),
            config: self.config,
            zones: self.zones,
            cache: self.cache,
            hints: self.hints,
            resolver: self.resolver,
            acl_evaluator: self.acl_evaluator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_types() {
        assert!(check_question_type(RecordType::A).is_ok());
        assert!(check_question_type(RecordType::ANY).is_ok());
        assert!(check_question_type(RecordType::AXFR)
            .unwrap_err()
            .is_not_implemented());
        assert!(check_question_type(RecordType::from(meta::MAILB))
            .unwrap_err()
            .is_not_implemented());
        assert!(check_question_type(RecordType::TSIG)
            .unwrap_err()
            .is_format_error());
        assert!(check_question_type(RecordType::OPT)
            .unwrap_err()
            .is_format_error());
    }
}
