// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Handing a query to the resolver and picking it up again

use tracing::{debug, warn};

use super::context::{Attributes, PendingFetch, QueryContext};
use super::QueryEngine;
use crate::error::{QueryError, QueryResult};
use crate::proto::rr::{Name, RecordType};
use crate::rdata::Rdataset;
use crate::resolver::{FetchEvent, FetchRequest};
use crate::session::Session;

impl QueryEngine {
    /// Starts a fetch for the query name
    ///
    /// A session still listening for requests must first hand that duty to a replacement and
    ///  take a slot of the recursive client quota.
    pub(super) fn start_recursion(
        &self,
        ctx: &mut QueryContext,
        qtype: RecordType,
        hint_domain: Option<Name>,
        hint_nameservers: Option<Rdataset>,
    ) -> QueryResult<()> {
        debug_assert!(ctx.fetch.is_none(), "a query waits for one fetch at a time");

        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| QueryError::server_failure("view has no resolver"))?;

        let mut permit = None;
        if !ctx.session.is_mortal() {
            let acquired = self
                .recursion_quota
                .clone()
                .try_acquire_owned()
                .map_err(|e| {
                    warn!(peer = %ctx.session.peer(), "no more recursive clients: {e}");
                    QueryError::server_failure("recursive client quota reached")
                })?;

            if let Err(e) = ctx.session.replace() {
                warn!(peer = %ctx.session.peer(), "no more recursive clients: {e}");
                return Err(e);
            }
            permit = Some(acquired);
        }

        let fetch = resolver.create_fetch(FetchRequest {
            qname: ctx.qname.clone(),
            qtype,
            hint_domain,
            hint_nameservers,
            options: ctx.fetch_options,
            want_dnssec: ctx.want_dnssec(),
        })?;

        debug!(qname = %ctx.qname, ?qtype, fetch = ?fetch.id(), "recursing");
        ctx.fetch = Some(PendingFetch {
            fetch,
            qtype,
            permit,
        });
        ctx.attributes.insert(Attributes::RECURSING);

        Ok(())
    }

    /// Accepts the completion of `pending`, or releases what it carried if the query is over
    pub(super) fn complete_recursion(
        &self,
        ctx: &mut QueryContext,
        pending: PendingFetch,
        event: FetchEvent,
    ) -> QueryResult<(RecordType, FetchEvent)> {
        ctx.attributes.remove(Attributes::RECURSING);

        let PendingFetch {
            fetch,
            qtype,
            permit,
        } = pending;
        drop(permit);

        if !event.completed || event.fetch != fetch.id() || ctx.session.is_shutting_down() {
            debug!(qname = %ctx.qname, fetch = ?fetch.id(), "query cancelled");
            let FetchEvent {
                rdataset,
                sig_rdataset,
                ..
            } = event;
            ctx.recycle(rdataset, sig_rdataset);
            return Err(QueryError::Cancelled);
        }

        ctx.refresh_now();
        Ok((qtype, event))
    }
}

/// Waits for the fetch to complete, cancelling it if the session shuts down first
pub(super) async fn wait_for_fetch(
    session: &dyn Session,
    pending: &mut PendingFetch,
) -> FetchEvent {
    let shutdown = session.shutdown_signal().clone();

    let event = tokio::select! {
        event = pending.fetch.completion() => Some(event),
        _ = shutdown.cancelled() => None,
    };

    match event {
        Some(event) => event,
        None => {
            pending.fetch.cancel();
            pending.fetch.completion().await
        }
    }
}
