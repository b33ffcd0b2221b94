mod common;

use common::{document_repository, document_store, ids, order, sample_orders, Order};
use polystore_core::backend::document::{
    DocumentRepository, DocumentStoreFactory, IndexDefinition,
};
use polystore_core::{
    BulkOperations, ContextCache, DataContext, EntityKey, FieldPatch, OrderBy, Page, ParamList,
    Predicate, RepoError, Repository, RepositoryOptions, Settings, Specification,
};
use std::sync::Arc;

#[test]
fn add_assigns_collection_scoped_ids() {
    let store = document_store();
    let repo = document_repository(&store, "orders");

    let first = repo.add(order(None, "ana", "open", 10)).unwrap().unwrap();
    let second = repo.add(order(None, "bo", "open", 20)).unwrap().unwrap();
    assert_eq!(first.id.as_deref(), Some("orders/1"));
    assert_eq!(second.id.as_deref(), Some("orders/2"));

    let loaded = repo.get_by_id::<Order>("orders/2").unwrap().unwrap();
    assert_eq!(loaded, second);
    assert!(repo.add(second.clone()).unwrap().is_none());
}

#[test]
fn writes_are_visible_to_other_scopes_immediately() {
    let store = document_store();
    let writer = document_repository(&store, "writer");
    let reader = document_repository(&store, "reader");

    writer.add(order(Some("o1"), "ana", "open", 10)).unwrap().unwrap();
    assert_eq!(reader.count::<Order>(None).unwrap(), 1);

    let removed = reader.remove_by_id::<Order>("o1").unwrap().unwrap();
    assert_eq!(removed.customer, "ana");
    assert!(writer.get_by_id::<Order>("o1").unwrap().is_none());
    assert!(writer.remove_by_id::<Order>("o1").unwrap().is_none());
}

#[test]
fn find_all_filters_orders_and_pages() {
    let store = document_store();
    let repo = document_repository(&store, "orders");
    for order in sample_orders() {
        repo.add(order).unwrap().unwrap();
    }

    let open = Specification::<Order>::new(Predicate::eq("status", "open"))
        .order_by(OrderBy::desc("total"))
        .order_by(OrderBy::asc("id"));
    let found = repo.find_all(&open, &Page::default()).unwrap();
    assert_eq!(
        found.iter().map(|o| o.id.clone().unwrap()).collect::<Vec<_>>(),
        vec!["o1", "o3", "o5"]
    );
    assert_eq!(repo.find_all(&open, &Page::new(2, 5)).unwrap().len(), 1);

    let substring = Specification::<Order>::new(Predicate::contains("customer", "n"));
    assert_eq!(ids(&repo.find_all(&substring, &Page::default()).unwrap()), vec!["o1", "o3"]);
}

#[test]
fn stale_etag_update_is_a_noop_by_default() {
    let store = document_store();
    let first = document_repository(&store, "first");
    let second = document_repository(&store, "second");
    first.add(order(Some("o1"), "ana", "open", 10)).unwrap().unwrap();

    let mut mine = first.get_by_id::<Order>("o1").unwrap().unwrap();
    let mut theirs = second.get_by_id::<Order>("o1").unwrap().unwrap();
    theirs.total = 11;
    assert!(second.update(theirs).unwrap().is_some());

    mine.total = 12;
    assert!(first.update(mine).unwrap().is_none());
    assert_eq!(second.get_by_id::<Order>("o1").unwrap().unwrap().total, 11);
}

#[test]
fn stale_etag_update_fails_in_strict_mode() {
    let store = document_store();
    let strict = DocumentRepository::with_options(
        DataContext::new(Arc::clone(&store), Arc::new(ContextCache::new()), "strict"),
        RepositoryOptions::strict(),
    );
    let other = document_repository(&store, "other");
    strict.add(order(Some("o1"), "ana", "open", 10)).unwrap().unwrap();

    let mut theirs = other.get_by_id::<Order>("o1").unwrap().unwrap();
    theirs.status = "shipped".to_string();
    other.update(theirs).unwrap().unwrap();

    let err = strict.update(order(Some("o1"), "ana", "open", 13)).unwrap_err();
    match err {
        RepoError::Conflict { collection, key } => {
            assert_eq!(collection, "orders");
            assert_eq!(key, "o1");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn detach_drops_the_tracked_etag_and_attach_restores_it() {
    let store = document_store();
    let mine = document_repository(&store, "mine");
    let other = document_repository(&store, "other");
    mine.add(order(Some("o1"), "ana", "open", 10)).unwrap().unwrap();

    let mut theirs = other.get_by_id::<Order>("o1").unwrap().unwrap();
    theirs.total = 20;
    other.update(theirs).unwrap().unwrap();

    let entity = order(Some("o1"), "ana", "open", 30);
    mine.detach(&entity).unwrap();
    assert!(mine.update(entity.clone()).unwrap().is_some());

    mine.attach(&entity).unwrap();
    let mut theirs = other.get_by_id::<Order>("o1").unwrap().unwrap();
    theirs.total = 40;
    other.update(theirs).unwrap().unwrap();
    assert!(mine.update(entity).unwrap().is_none());

    let missing = order(Some("ghost"), "zed", "open", 1);
    assert!(matches!(mine.attach(&missing), Err(RepoError::InvalidData(_))));
}

#[test]
fn bulk_operations_report_affected_counts() {
    let store = document_store();
    let repo = document_repository(&store, "orders");
    assert_eq!(repo.insert_many(sample_orders()).unwrap(), 5);

    let loaded = repo
        .get_many::<Order>(&[EntityKey::from("o5"), EntityKey::from("o2")])
        .unwrap();
    assert_eq!(loaded[0].id.as_deref(), Some("o5"));
    assert_eq!(loaded[1].id.as_deref(), Some("o2"));

    let err = repo.insert_many(vec![
        order(Some("o1"), "ana", "open", 1),
        order(Some("o6"), "dee", "open", 2),
    ]);
    match err.unwrap_err() {
        RepoError::PartialFailure(outcome) => {
            assert_eq!(outcome.succeeded, 1);
            assert_eq!(outcome.failed_targets(), vec!["o1"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(
        repo.delete_by_ids::<Order>(&[EntityKey::from("o6"), EntityKey::from("nope")])
            .unwrap(),
        1
    );
    let open = Specification::<Order>::new(Predicate::eq("status", "open"));
    assert_eq!(repo.delete_where(&open).unwrap(), 3);
    assert_eq!(repo.count::<Order>(None).unwrap(), 2);
}

#[test]
fn keyless_bulk_updates_are_reported_by_position() {
    let store = document_store();
    let repo = document_repository(&store, "orders");
    repo.add(order(Some("o1"), "ana", "open", 1)).unwrap().unwrap();

    let changed = order(Some("o1"), "ana", "open", 99);
    let keyless = order(None, "bo", "open", 5);
    match repo.update_many(vec![changed, keyless]).unwrap_err() {
        RepoError::PartialFailure(outcome) => {
            assert_eq!(outcome.succeeded, 1);
            assert_eq!(outcome.failed_targets(), vec!["#1"]);
            assert!(matches!(outcome.failures[0].error, RepoError::InvalidData(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(repo.get_by_id::<Order>("o1").unwrap().unwrap().total, 99);
}

#[test]
fn native_commands_and_set_updates_are_unsupported() {
    let store = document_store();
    let repo = document_repository(&store, "orders");
    assert!(matches!(
        repo.execute::<Order>("from orders", &ParamList::new()),
        Err(RepoError::Unsupported { backend: "document", .. })
    ));
    assert!(matches!(
        repo.update_where(&Specification::<Order>::all(), &FieldPatch::new().set("status", "x")),
        Err(RepoError::Unsupported { operation: "update_where", .. })
    ));
}

#[test]
fn factory_stores_share_engines_by_address() {
    let factory = DocumentStoreFactory::new(
        Settings::new()
            .with("Document.Default", "mem://shared")
            .with("Document.Reporting.Url", "mem://shared"),
    );
    let writer = DocumentRepository::new(DataContext::with_default_scope(
        factory.default_store().unwrap(),
        Arc::new(ContextCache::new()),
    ));
    let reporting = DocumentRepository::new(DataContext::with_default_scope(
        factory.store("Document.Reporting").unwrap(),
        Arc::new(ContextCache::new()),
    ));

    writer.add(order(Some("o1"), "ana", "open", 10)).unwrap().unwrap();
    assert!(reporting.get_by_id::<Order>("o1").unwrap().is_some());
    assert_eq!(writer.source(), "mem://shared");
}

#[test]
fn offline_engine_surfaces_backend_errors() {
    let store = document_store();
    let repo = document_repository(&store, "orders");
    store.engine(None).unwrap().set_online(false);

    assert!(matches!(
        repo.get_by_id::<Order>("o1"),
        Err(RepoError::Backend(_))
    ));
}

#[test]
fn named_indexes_filter_and_sort_mapped_documents() {
    let factory =
        DocumentStoreFactory::new(Settings::new().with("Document.Default", "mem://indexed"));
    factory
        .create_index(
            IndexDefinition::for_entity::<Order>("orders/open-by-total")
                .map(Predicate::eq("status", "open"))
                .field("customer")
                .field("total")
                .sort(OrderBy::desc("total")),
        )
        .unwrap();
    let repo = DocumentRepository::new(DataContext::with_default_scope(
        factory.default_store().unwrap(),
        Arc::new(ContextCache::new()),
    ));
    repo.insert_many(sample_orders()).unwrap();

    let open = repo
        .find_in_index(
            "orders/open-by-total",
            &Specification::<Order>::all(),
            &Page::default(),
        )
        .unwrap();
    let open_ids = open
        .iter()
        .map(|order| order.id.clone().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(open_ids, vec!["o1", "o3", "o5"]);

    let bo = Specification::<Order>::new(Predicate::eq("customer", "bo"));
    let found = repo
        .find_in_index("orders/open-by-total", &bo, &Page::default())
        .unwrap();
    assert_eq!(ids(&found), vec!["o5"]);

    let by_coupon = Specification::<Order>::new(Predicate::is_null("coupon"));
    assert!(matches!(
        repo.find_in_index("orders/open-by-total", &by_coupon, &Page::default()),
        Err(RepoError::InvalidData(_))
    ));
    assert!(matches!(
        repo.find_in_index("orders/missing", &bo, &Page::default()),
        Err(RepoError::InvalidData(_))
    ));
}
