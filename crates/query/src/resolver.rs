// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Interface to the recursive resolver which fetches data the view does not hold

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::db::{Database, FindCode};
use crate::error::{QueryError, QueryResult};
use crate::proto::rr::{Name, RecordType};
use crate::rdata::Rdataset;

/// Identity of one fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FetchId(u64);

impl FetchId {
    /// A process unique id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Options passed to the resolver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip DNSSEC validation, the client set CD
    pub no_validate: bool,
}

/// What to fetch and where to start
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Name to resolve
    pub qname: Name,
    /// Type to resolve
    pub qtype: RecordType,
    /// The zone cut to start from, if one is known
    pub hint_domain: Option<Name>,
    /// Name servers of `hint_domain`
    pub hint_nameservers: Option<Rdataset>,
    /// Resolver options
    pub options: FetchOptions,
    /// Ask for signatures along with the data
    pub want_dnssec: bool,
}

/// Delivered once when a fetch finishes
#[derive(Clone)]
pub struct FetchEvent {
    /// The fetch this event completes
    pub fetch: FetchId,
    /// False if the fetch was cancelled before it finished
    pub completed: bool,
    /// How the resolution ended
    pub result: QueryResult<FindCode>,
    /// The database the data was stored in, normally the cache
    pub db: Option<Arc<dyn Database>>,
    /// Owner of the data
    pub found_name: Name,
    /// The data
    pub rdataset: Rdataset,
    /// Signatures of the data
    pub sig_rdataset: Option<Rdataset>,
}

impl FetchEvent {
    /// An answer for `fetch`
    pub fn answer(
        fetch: FetchId,
        code: FindCode,
        db: Option<Arc<dyn Database>>,
        found_name: Name,
        rdataset: Rdataset,
    ) -> Self {
        Self {
            fetch,
            completed: true,
            result: Ok(code),
            db,
            found_name,
            rdataset,
            sig_rdataset: None,
        }
    }

    /// Resolution of `fetch` failed
    pub fn failed(fetch: FetchId, error: QueryError) -> Self {
        Self {
            fetch,
            completed: true,
            result: Err(error),
            db: None,
            found_name: Name::root(),
            rdataset: Rdataset::default(),
            sig_rdataset: None,
        }
    }

    /// `fetch` was cancelled
    pub fn cancelled(fetch: FetchId) -> Self {
        Self {
            completed: false,
            ..Self::failed(fetch, QueryError::Cancelled)
        }
    }

    /// Attach signatures
    pub fn with_signatures(mut self, sig_rdataset: Rdataset) -> Self {
        self.sig_rdataset = Some(sig_rdataset);
        self
    }
}

impl fmt::Debug for FetchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchEvent")
            .field("fetch", &self.fetch)
            .field("completed", &self.completed)
            .field("result", &self.result)
            .field("found_name", &self.found_name)
            .field("rdataset", &self.rdataset.rr_type())
            .finish_non_exhaustive()
    }
}

/// The query side of an outstanding fetch
#[derive(Debug)]
pub struct Fetch {
    id: FetchId,
    completion: oneshot::Receiver<FetchEvent>,
    cancel: CancellationToken,
}

impl Fetch {
    /// Creates a fetch and the handle the resolver uses to complete it
    pub fn new() -> (Self, FetchResponder) {
        let id = FetchId::next();
        let (sender, completion) = oneshot::channel();
        let cancel = CancellationToken::new();

        (
            Self {
                id,
                completion,
                cancel: cancel.clone(),
            },
            FetchResponder { id, sender, cancel },
        )
    }

    /// Identity of this fetch
    pub fn id(&self) -> FetchId {
        self.id
    }

    /// Asks the resolver to stop; calling this more than once has no further effect
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the completion event
    ///
    /// A resolver that goes away without answering is reported as a cancellation.
    pub async fn completion(&mut self) -> FetchEvent {
        match (&mut self.completion).await {
            Ok(event) => event,
            Err(_) => FetchEvent::cancelled(self.id),
        }
    }
}

/// The resolver side of an outstanding fetch
#[derive(Debug)]
pub struct FetchResponder {
    id: FetchId,
    sender: oneshot::Sender<FetchEvent>,
    cancel: CancellationToken,
}

impl FetchResponder {
    /// Identity of the fetch being answered
    pub fn id(&self) -> FetchId {
        self.id
    }

    /// True once the query side cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the query side cancels
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Delivers the completion event; a cancelled fetch is always reported as cancelled
    pub fn complete(self, event: FetchEvent) {
        let event = if self.cancel.is_cancelled() {
            FetchEvent::cancelled(self.id)
        } else {
            event
        };

        // the query may already be gone, there is nobody left to tell
        let _ = self.sender.send(event);
    }
}

/// The recursive resolver of a view
pub trait Resolver: Send + Sync {
    /// Starts resolving `request`; the outcome arrives through the returned [`Fetch`]
    fn create_fetch(&self, request: FetchRequest) -> QueryResult<Fetch>;
}
