// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod common;

use std::sync::Arc;

use std::net::Ipv4Addr;

use hickory_query::config::{PoolConfig, SortListEntry};
use hickory_query::proto::op::ResponseCode;
use hickory_query::proto::rr::RecordType;
use hickory_query::session::ClientSession;
use hickory_query::stats::{AtomicQueryStats, QueryCounter};
use hickory_query::store::{InMemoryDatabase, ZoneCatalog};
use hickory_query::{
    Access, Database, Question, QueryEngine, Rdata, Rdataset, RecordTypeExt, Request, Response,
    Trust, ViewConfig, Zone, MAX_RESTARTS,
};

use common::*;

fn catalog(zones: impl IntoIterator<Item = Zone>) -> Arc<ZoneCatalog> {
    let mut catalog = ZoneCatalog::new();
    for zone in zones {
        catalog.upsert(zone);
    }
    Arc::new(catalog)
}

fn authoritative_engine() -> QueryEngine {
    let zone = Zone::new(Arc::new(example_zone()));
    QueryEngine::builder(ViewConfig::default(), catalog([zone]))
        .build()
        .unwrap()
}

async fn query(engine: &QueryEngine, request: Request) -> Response {
    subscribe();
    let session = Arc::new(ClientSession::mortal(peer()));
    engine.query(session, request).await.unwrap()
}

#[tokio::test]
async fn test_authoritative_answer() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("www.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response.authoritative());
    assert!(!response.recursion_available());
    assert!(response
        .answers()
        .contains(&name("www.example.com."), RecordType::A));
    assert!(response
        .authorities()
        .contains(&name("example.com."), RecordType::NS));
    assert!(response
        .additionals()
        .contains(&name("ns1.example.com."), RecordType::A));
    // key data only goes to clients asking for DNSSEC
    assert!(!response
        .additionals()
        .contains(&name("ns1.example.com."), RecordType::KEY));
}

#[tokio::test]
async fn test_nxdomain_has_soa() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("ghost.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    assert!(response.answers().is_empty());

    let soa = response
        .authorities()
        .rdataset(&name("example.com."), RecordType::SOA)
        .expect("SOA in authority");
    assert!(soa.ttl() <= 300);
    assert!(!response
        .authorities()
        .contains(&name("example.com."), RecordType::NS));
}

#[tokio::test]
async fn test_soa_question_for_missing_name_has_zero_ttl() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("ghost.example.com."), RecordType::SOA),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    let soa = response
        .authorities()
        .rdataset(&name("example.com."), RecordType::SOA)
        .unwrap();
    assert_eq!(soa.ttl(), 0);
}

#[tokio::test]
async fn test_nodata() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("www.example.com."), RecordType::MX),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response.answers().is_empty());
    assert!(response
        .authorities()
        .contains(&name("example.com."), RecordType::SOA));
}

#[tokio::test]
async fn test_cname_is_followed() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("alias.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    let answers = response.answers();
    assert!(answers.contains(&name("alias.example.com."), RecordType::CNAME));
    assert!(answers.contains(&name("www.example.com."), RecordType::A));
    assert_eq!(answers.entries()[0].name(), &name("alias.example.com."));
}

#[tokio::test]
async fn test_nxdomain_after_cname_keeps_the_alias() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("dangling.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response
        .answers()
        .contains(&name("dangling.example.com."), RecordType::CNAME));
    assert!(response.authorities().is_empty());
}

#[tokio::test]
async fn test_dname_synthesizes_cname() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("www.old.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    let answers = response.answers();
    assert!(answers.contains(&name("old.example.com."), RecordType::dname()));

    let synthesized = answers
        .rdataset(&name("www.old.example.com."), RecordType::CNAME)
        .expect("synthesized CNAME");
    assert_eq!(
        synthesized.first().and_then(|rdata| rdata.target()),
        Some(&name("www.example.com."))
    );
    assert!(answers.contains(&name("www.example.com."), RecordType::A));
}

#[tokio::test]
async fn test_dname_substitution_too_long() {
    let long = |c: char| c.to_string().repeat(63);
    let owner = name("d.example.com.");
    let target = name(&format!("{}.{}.example.com.", long('x'), long('y')));
    let zone = example_zone().with_rdataset(owner, dname(&target.to_string()));
    let engine = QueryEngine::builder(
        ViewConfig::default(),
        catalog([Zone::new(Arc::new(zone))]),
    )
    .build()
    .unwrap();

    let qname = name(&format!(
        "{}.{}.{}.d.example.com.",
        long('a'),
        long('b'),
        long('c')
    ));
    let response = query(&engine, Request::query(qname, RecordType::A)).await;

    assert_eq!(response.response_code(), ResponseCode::YXDomain);
    assert!(response
        .answers()
        .contains(&name("d.example.com."), RecordType::dname()));
}

#[tokio::test]
async fn test_restarts_are_bounded() {
    let mut zone = example_zone();
    for i in 0..20 {
        zone = zone.with_rdataset(
            name(&format!("c{i}.example.com.")),
            cname(&format!("c{}.example.com.", i + 1)),
        );
    }
    zone = zone.with_rdataset(name("c20.example.com."), a([192, 0, 2, 20]));

    let stats = Arc::new(AtomicQueryStats::default());
    let engine = QueryEngine::builder(
        ViewConfig::default(),
        catalog([Zone::new(Arc::new(zone))]),
    )
    .stats(stats.clone())
    .build()
    .unwrap();

    // without RD the partial answer is kept
    let response = query(
        &engine,
        Request::query(name("c0.example.com."), RecordType::A),
    )
    .await;
    assert_eq!(response.response_code(), ResponseCode::ServFail);
    assert_eq!(
        response.answers().entries().len(),
        usize::from(MAX_RESTARTS) + 1
    );
    assert!(!response
        .answers()
        .contains(&name("c20.example.com."), RecordType::A));
    assert_eq!(stats.snapshot().get(QueryCounter::Failure), 1);

    // with RD the client is told nothing
    let response = query(
        &engine,
        Request::query(name("c0.example.com."), RecordType::A).with_recursion_desired(true),
    )
    .await;
    assert_eq!(response.response_code(), ResponseCode::ServFail);
    assert!(response.answers().is_empty());
}

#[tokio::test]
async fn test_ns_at_apex_is_not_repeated() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("example.com."), RecordType::NS),
    )
    .await;

    assert!(response
        .answers()
        .contains(&name("example.com."), RecordType::NS));
    assert!(response.authorities().is_empty());
    assert!(response
        .additionals()
        .contains(&name("ns1.example.com."), RecordType::A));
}

#[tokio::test]
async fn test_any_returns_every_rdataset() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("ns1.example.com."), RecordType::ANY),
    )
    .await;

    let answers = response.answers();
    assert!(answers.contains(&name("ns1.example.com."), RecordType::A));
    assert!(answers.contains(&name("ns1.example.com."), RecordType::KEY));
}

#[tokio::test]
async fn test_referral_without_cache() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("host.sub.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(!response.authoritative());
    assert!(response.answers().is_empty());
    assert!(response
        .authorities()
        .contains(&name("sub.example.com."), RecordType::NS));
    // glue from below the zone cut
    assert!(response
        .additionals()
        .contains(&name("ns.sub.example.com."), RecordType::A));
}

#[tokio::test]
async fn test_cache_delegation_closer_than_zone() {
    let cache = InMemoryDatabase::cache()
        .with_rdataset(
            name("deep.sub.example.com."),
            ns("ns.deep.sub.example.com.").with_trust(Trust::Answer),
        )
        .with_rdataset(
            name("ns.deep.sub.example.com."),
            a([192, 0, 2, 99]).with_trust(Trust::Glue),
        );

    let engine = QueryEngine::builder(
        ViewConfig::default(),
        catalog([Zone::new(Arc::new(example_zone()))]),
    )
    .cache(Arc::new(cache))
    .build()
    .unwrap();

    let response = query(
        &engine,
        Request::query(name("host.deep.sub.example.com."), RecordType::A),
    )
    .await;

    let authorities = response.authorities();
    assert!(authorities.contains(&name("deep.sub.example.com."), RecordType::NS));
    assert!(!authorities.contains(&name("sub.example.com."), RecordType::NS));
    // cached glue is good enough for a referral
    assert!(response
        .additionals()
        .contains(&name("ns.deep.sub.example.com."), RecordType::A));
}

#[tokio::test]
async fn test_zone_delegation_closer_than_cache() {
    let cache = InMemoryDatabase::cache().with_rdataset(
        name("com."),
        ns("a.gtld-servers.net.").with_trust(Trust::Answer),
    );

    let engine = QueryEngine::builder(
        ViewConfig::default(),
        catalog([Zone::new(Arc::new(example_zone()))]),
    )
    .cache(Arc::new(cache))
    .build()
    .unwrap();

    let response = query(
        &engine,
        Request::query(name("host.sub.example.com."), RecordType::A),
    )
    .await;

    let authorities = response.authorities();
    assert!(authorities.contains(&name("sub.example.com."), RecordType::NS));
    assert!(!authorities.contains(&name("com."), RecordType::NS));
    assert!(response
        .additionals()
        .contains(&name("ns.sub.example.com."), RecordType::A));
}

#[tokio::test]
async fn test_cached_nxdomain() {
    let cache = InMemoryDatabase::cache().with_rdataset(
        name("gone.example.org."),
        Rdataset::negative(RecordType::ANY, 60),
    );

    let engine = QueryEngine::builder(ViewConfig::default(), Arc::new(ZoneCatalog::new()))
        .cache(Arc::new(cache))
        .build()
        .unwrap();

    let response = query(
        &engine,
        Request::query(name("gone.example.org."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    assert!(!response.authoritative());
    assert!(response.answers().is_empty());
}

#[tokio::test]
async fn test_access_list_checked_once_per_database() {
    let evaluator = Arc::new(CountingEvaluator::default());
    let zone = Zone::new(Arc::new(example_zone()))
        .with_query_acl(Access::from_networks(["192.0.2.0/24".parse().unwrap()]));

    let engine = QueryEngine::builder(ViewConfig::default(), catalog([zone]))
        .acl_evaluator(evaluator.clone())
        .build()
        .unwrap();

    let response = query(
        &engine,
        Request::query(name("alias.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(!response.additionals().is_empty());
    assert_eq!(evaluator.checks(), 1);
}

#[tokio::test]
async fn test_zone_access_denied() {
    let evaluator = Arc::new(CountingEvaluator::default());
    let zone = Zone::new(Arc::new(example_zone())).with_query_acl(Access::deny_all());

    let engine = QueryEngine::builder(ViewConfig::default(), catalog([zone]))
        .acl_evaluator(evaluator.clone())
        .build()
        .unwrap();

    let response = query(
        &engine,
        Request::query(name("www.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::Refused);
    assert!(response.answers().is_empty());
    assert!(response.authorities().is_empty());
    assert_eq!(evaluator.checks(), 1);
}

#[tokio::test]
async fn test_refused_zone_falls_back_to_cache() {
    let evaluator = Arc::new(CountingEvaluator::default());
    let zone = Zone::new(Arc::new(example_zone())).with_query_acl(Access::deny_all());
    let cache = InMemoryDatabase::cache().with_rdataset(
        name("www.example.com."),
        a([203, 0, 113, 80]).with_trust(Trust::Answer),
    );

    let engine = QueryEngine::builder(ViewConfig::default(), catalog([zone]))
        .cache(Arc::new(cache))
        .acl_evaluator(evaluator.clone())
        .build()
        .unwrap();

    let response = query(
        &engine,
        Request::query(name("www.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(!response.authoritative());
    let answer = response
        .answers()
        .rdataset(&name("www.example.com."), RecordType::A)
        .unwrap();
    assert_eq!(answer.trust(), Trust::Answer);
    assert_eq!(evaluator.checks(), 1);
}

#[tokio::test]
async fn test_one_version_per_database() {
    let db = Arc::new(CountingDatabase::new(example_zone()));
    let zone = Zone::new(db.clone() as Arc<dyn Database>);
    let engine = QueryEngine::builder(ViewConfig::default(), catalog([zone]))
        .build()
        .unwrap();

    let response = query(
        &engine,
        Request::query(name("alias.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(db.opened(), 1);
    assert_eq!(db.closed(), 1);
}

#[tokio::test]
async fn test_key_from_parent_zone() {
    let child = InMemoryDatabase::zone(name("sub.example.com."))
        .with_rdataset(name("sub.example.com."), soa("sub.example.com."))
        .with_rdataset(name("sub.example.com."), ns("ns.sub.example.com."));

    let engine = QueryEngine::builder(
        ViewConfig::default(),
        catalog([
            Zone::new(Arc::new(example_zone())),
            Zone::new(Arc::new(child)),
        ]),
    )
    .build()
    .unwrap();

    let response = query(
        &engine,
        Request::query(name("sub.example.com."), RecordType::KEY),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response
        .answers()
        .contains(&name("sub.example.com."), RecordType::KEY));
    assert!(response
        .authorities()
        .contains(&name("example.com."), RecordType::NS));
}

#[tokio::test]
async fn test_dnssec_key_in_additional() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("www.example.com."), RecordType::A).with_dnssec_ok(true),
    )
    .await;

    let additionals = response.additionals();
    assert!(additionals.contains(&name("ns1.example.com."), RecordType::A));
    assert!(additionals.contains(&name("ns1.example.com."), RecordType::KEY));
}

#[tokio::test]
async fn test_question_count() {
    let engine = authoritative_engine();

    let response = query(&engine, Request::default()).await;
    assert_eq!(response.response_code(), ResponseCode::FormErr);

    let mut request = Request::query(name("www.example.com."), RecordType::A);
    request
        .questions
        .push(Question::new(name("example.com."), RecordType::NS));
    let response = query(&engine, request).await;
    assert_eq!(response.response_code(), ResponseCode::FormErr);
    assert!(response.answers().is_empty());
}

#[tokio::test]
async fn test_unsupported_question_types() {
    let engine = authoritative_engine();

    let response = query(
        &engine,
        Request::query(name("example.com."), RecordType::AXFR),
    )
    .await;
    assert_eq!(response.response_code(), ResponseCode::NotImp);

    let response = query(
        &engine,
        Request::query(name("example.com."), RecordType::OPT),
    )
    .await;
    assert_eq!(response.response_code(), ResponseCode::FormErr);
}

#[tokio::test]
async fn test_negative_cache_keeps_referral_glue() {
    let cache = InMemoryDatabase::cache().with_rdataset(
        name("ns.sub.example.com."),
        Rdataset::negative(RecordType::A, 60),
    );

    let engine = QueryEngine::builder(
        ViewConfig::default(),
        catalog([Zone::new(Arc::new(example_zone()))]),
    )
    .cache(Arc::new(cache))
    .build()
    .unwrap();

    let response = query(
        &engine,
        Request::query(name("host.sub.example.com."), RecordType::A),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response
        .authorities()
        .contains(&name("sub.example.com."), RecordType::NS));
    assert!(response
        .additionals()
        .contains(&name("ns.sub.example.com."), RecordType::A));
}

#[tokio::test]
async fn test_negative_answer_fits_one_pool_block() {
    let config = ViewConfig {
        pool: PoolConfig {
            max_blocks: 1,
            ..PoolConfig::default()
        },
        ..ViewConfig::default()
    };
    let engine = QueryEngine::builder(config, catalog([Zone::new(Arc::new(example_zone()))]))
        .build()
        .unwrap();

    let response = query(
        &engine,
        Request::query(name("ghost.example.com."), RecordType::A),
    )
    .await;
    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    assert!(response
        .authorities()
        .contains(&name("example.com."), RecordType::SOA));

    let response = query(
        &engine,
        Request::query(name("www.example.com."), RecordType::MX),
    )
    .await;
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response
        .authorities()
        .contains(&name("example.com."), RecordType::SOA));
}

fn example_net() -> InMemoryDatabase {
    InMemoryDatabase::zone(name("example.net."))
        .with_rdataset(name("example.net."), soa("example.net."))
        .with_rdataset(name("example.net."), ns("ns1.example.com."))
        .with_rdataset(name("www.example.net."), a([198, 51, 100, 1]))
}

#[tokio::test]
async fn test_answers_stay_in_the_first_zone() {
    let zones = || {
        catalog([
            Zone::new(Arc::new(
                example_zone()
                    .with_rdataset(name("away.example.com."), cname("www.example.net.")),
            )),
            Zone::new(Arc::new(example_net())),
        ])
    };
    let request = || Request::query(name("away.example.com."), RecordType::A);

    let engine = QueryEngine::builder(ViewConfig::default(), zones())
        .build()
        .unwrap();
    let response = query(&engine, request()).await;
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response
        .answers()
        .contains(&name("www.example.net."), RecordType::A));

    let config = ViewConfig {
        additional_from_auth: false,
        ..ViewConfig::default()
    };
    let engine = QueryEngine::builder(config, zones()).build().unwrap();
    let response = query(&engine, request()).await;

    assert_eq!(response.response_code(), ResponseCode::Refused);
    assert!(response
        .answers()
        .contains(&name("away.example.com."), RecordType::CNAME));
    assert!(!response
        .answers()
        .contains(&name("www.example.net."), RecordType::A));
}

#[tokio::test]
async fn test_auth_nxdomain_sets_aa_on_cached_nxdomain() {
    let cache = || {
        Arc::new(InMemoryDatabase::cache().with_rdataset(
            name("gone.example.org."),
            Rdataset::negative(RecordType::ANY, 60),
        ))
    };
    let request = || Request::query(name("gone.example.org."), RecordType::A);

    let config = ViewConfig {
        auth_nxdomain: true,
        ..ViewConfig::default()
    };
    let engine = QueryEngine::builder(config, Arc::new(ZoneCatalog::new()))
        .cache(cache())
        .build()
        .unwrap();
    let response = query(&engine, request()).await;

    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    assert!(response.authoritative());

    let engine = QueryEngine::builder(ViewConfig::default(), Arc::new(ZoneCatalog::new()))
        .cache(cache())
        .build()
        .unwrap();
    let response = query(&engine, request()).await;

    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    assert!(!response.authoritative());
}

#[tokio::test]
async fn test_sig_question_without_signatures() {
    let engine = authoritative_engine();
    let response = query(
        &engine,
        Request::query(name("www.example.com."), RecordType::SIG),
    )
    .await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response.answers().is_empty());
    assert!(response
        .authorities()
        .contains(&name("example.com."), RecordType::SOA));
}

#[tokio::test]
async fn test_sortlist_orders_answer_addresses() {
    let zone = example_zone().with_rdataset(
        name("pool.example.com."),
        Rdataset::new(
            RecordType::A,
            300,
            vec![
                Rdata::A(Ipv4Addr::new(192, 0, 2, 7)),
                Rdata::A(Ipv4Addr::new(10, 9, 0, 7)),
                Rdata::A(Ipv4Addr::new(10, 1, 0, 7)),
            ],
        ),
    );
    let config = ViewConfig {
        sortlist: vec![SortListEntry {
            clients: vec!["192.0.2.0/24".parse().unwrap()],
            preferred: vec!["10.1.0.0/16".parse().unwrap(), "10.0.0.0/8".parse().unwrap()],
        }],
        ..ViewConfig::default()
    };
    let engine = QueryEngine::builder(config, catalog([Zone::new(Arc::new(zone))]))
        .build()
        .unwrap();

    let response = query(
        &engine,
        Request::query(name("pool.example.com."), RecordType::A),
    )
    .await;

    assert!(response.sort_order().is_some());
    let addresses = response
        .answers()
        .rdataset(&name("pool.example.com."), RecordType::A)
        .unwrap()
        .rdata()
        .iter()
        .filter_map(Rdata::ip_addr)
        .map(|ip| ip.to_string())
        .collect::<Vec<_>>();
    assert_eq!(addresses, ["10.1.0.7", "10.9.0.7", "192.0.2.7"]);
}

#[tokio::test]
async fn test_stats_are_attributed_to_the_zone() {
    let stats = Arc::new(AtomicQueryStats::default());
    let engine = QueryEngine::builder(
        ViewConfig::default(),
        catalog([Zone::new(Arc::new(example_zone()))]),
    )
    .stats(stats.clone())
    .build()
    .unwrap();

    query(
        &engine,
        Request::query(name("www.example.com."), RecordType::A),
    )
    .await;
    query(
        &engine,
        Request::query(name("ghost.example.com."), RecordType::A),
    )
    .await;

    let zone = stats.zone_snapshot(&name("example.com."));
    assert_eq!(zone.get(QueryCounter::Success), 1);
    assert_eq!(zone.get(QueryCounter::NxDomain), 1);
    assert_eq!(zone.total(), 2);
    assert_eq!(stats.snapshot().total(), 2);
    assert_eq!(stats.zone_snapshot(&name("example.net.")).total(), 0);
}
