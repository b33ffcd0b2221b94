mod common;

use common::{
    document_repository, document_store, ids, sample_orders, search_repository, sql_repository,
    Order,
};
use polystore_core::backend::search::SearchIndex;
use polystore_core::db::DbLocation;
use polystore_core::{BulkOperations, OrderBy, Page, Predicate, Repository, Specification};
use std::sync::Arc;

/// Predicates every backend can translate.
fn portable_predicates() -> Vec<(&'static str, Predicate)> {
    vec![
        ("eq", Predicate::eq("status", "open")),
        ("ne", Predicate::ne("customer", "bo")),
        ("lt", Predicate::lt("total", 80)),
        ("le", Predicate::le("total", 80)),
        ("gt", Predicate::gt("total", 80)),
        ("ge", Predicate::ge("total", 120)),
        ("prefix", Predicate::starts_with("status", "can")),
        ("in", Predicate::is_in("customer", ["ana", "cy"])),
        ("in-empty", Predicate::is_in("customer", Vec::<String>::new())),
        ("is-null", Predicate::is_null("coupon")),
        ("eq-null", Predicate::eq("coupon", serde_json::Value::Null)),
        ("ne-missing", Predicate::ne("coupon", "SPRING")),
        ("mismatched-kind", Predicate::eq("total", "120")),
        (
            "and",
            Predicate::eq("status", "open").and(Predicate::ge("total", 80)),
        ),
        (
            "or",
            Predicate::eq("customer", "cy").or(Predicate::lt("total", 50)),
        ),
        ("not", Predicate::eq("status", "open").negate()),
        ("not-missing", Predicate::eq("coupon", "SPRING").negate()),
        ("always", Predicate::always()),
        ("never", Predicate::never()),
    ]
}

fn expected(predicate: &Predicate) -> Vec<String> {
    let spec = Specification::<Order>::new(predicate.clone());
    let matching = sample_orders()
        .into_iter()
        .filter(|order| spec.matches(order))
        .collect::<Vec<_>>();
    ids(&matching)
}

#[test]
fn reference_evaluation_matches_hand_computed_sets() {
    let cases = [
        ("eq", vec!["o1", "o3", "o5"]),
        ("ne-missing", vec![]),
        ("mismatched-kind", vec![]),
        ("not-missing", vec!["o1", "o2", "o3", "o5"]),
        ("eq-null", vec!["o1", "o2", "o3", "o5"]),
        ("in-empty", vec![]),
    ];
    let predicates = portable_predicates();
    for (name, want) in cases {
        let (_, predicate) = predicates
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .unwrap();
        assert_eq!(expected(predicate), want, "{name}");
    }
}

#[test]
fn every_backend_agrees_with_reference_evaluation() {
    let sql = sql_repository(DbLocation::Memory, "spec");
    let store = document_store();
    let document = document_repository(&store, "spec");
    let index = Arc::new(SearchIndex::new("spec-index"));
    let search = search_repository(&index);

    sql.insert_many(sample_orders()).unwrap();
    document.insert_many(sample_orders()).unwrap();
    search.insert_many(sample_orders()).unwrap();

    for (name, predicate) in portable_predicates() {
        let want = expected(&predicate);
        let spec = Specification::<Order>::new(predicate);

        let from_sql = ids(&sql.find_all(&spec, &Page::default()).unwrap());
        let from_document = ids(&document.find_all(&spec, &Page::default()).unwrap());
        let from_search = ids(&search.find_all(&spec, &Page::default()).unwrap());
        assert_eq!(from_sql, want, "sql: {name}");
        assert_eq!(from_document, want, "document: {name}");
        assert_eq!(from_search, want, "search: {name}");

        let count = want.len() as u64;
        assert_eq!(sql.count(Some(&spec)).unwrap(), count, "sql count: {name}");
        assert_eq!(document.count(Some(&spec)).unwrap(), count, "document count: {name}");
        assert_eq!(search.count(Some(&spec)).unwrap(), count, "search count: {name}");
    }
}

#[test]
fn invalid_field_paths_are_rejected_everywhere() {
    let sql = sql_repository(DbLocation::Memory, "spec");
    let store = document_store();
    let document = document_repository(&store, "spec");
    let index = Arc::new(SearchIndex::new("spec-index"));
    let search = search_repository(&index);
    let spec = Specification::<Order>::new(Predicate::eq("total) OR (1", 1));

    assert!(sql.find_all(&spec, &Page::default()).is_err());
    assert!(document.find_all(&spec, &Page::default()).is_err());
    assert!(search.find_all(&spec, &Page::default()).is_err());
}

#[test]
fn combined_specifications_keep_ordering_hints() {
    let open = Specification::<Order>::new(Predicate::eq("status", "open"))
        .order_by(OrderBy::desc("total"));
    let large = Specification::<Order>::new(Predicate::ge("total", 80))
        .order_by(OrderBy::asc("customer"));
    let both = open.and(large);

    assert_eq!(both.order().len(), 2);
    assert!(both.validate().is_ok());
    let matching = sample_orders()
        .into_iter()
        .filter(|order| both.matches(order))
        .collect::<Vec<_>>();
    assert_eq!(ids(&matching), vec!["o1", "o3"]);
}
