mod common;

use chrono::{Duration, Utc};
use common::{line, order, sql_repository, Order};
use polystore_core::adapter::SwitchablePrincipal;
use polystore_core::audit::{
    cascade_audit_at, AuditMetadata, AuditNode, Cascade, CascadeMode, NodeId, SharedNode,
};
use polystore_core::db::DbLocation;
use polystore_core::{
    AnonymousPrincipal, AuditableRepository, BulkOperations, Entity, EntityKey, NamedPrincipal,
    Repository,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[test]
fn create_stamps_the_whole_order_graph() {
    let repo = AuditableRepository::new(
        sql_repository(DbLocation::Memory, "audit"),
        Arc::new(NamedPrincipal::new("ana")),
    );
    let mut draft = order(Some("o1"), "ana", "open", 30);
    draft.lines = vec![line("sku-1", 1), line("sku-2", 2)];

    let added = repo.add(draft).unwrap().unwrap();
    let stored = repo.get_by_id::<Order>("o1").unwrap().unwrap();
    assert_eq!(stored, added);

    let audit_id = stored.audit.audit_id.expect("root audit id");
    assert_eq!(stored.audit.created_by.as_deref(), Some("ana"));
    assert!(stored.audit.create_date.is_some());
    assert!(stored.audit.update_date.is_none());
    for item in &stored.lines {
        assert_eq!(item.audit.audit_id, Some(audit_id));
        assert_eq!(item.audit.created_by.as_deref(), Some("ana"));
        assert_eq!(item.audit.create_date, stored.audit.create_date);
    }
}

#[test]
fn update_keeps_creation_and_stamps_new_children_as_created() {
    let principal = SwitchablePrincipal::new();
    principal.switch_to(Some("ana"));
    let repo = AuditableRepository::new(
        sql_repository(DbLocation::Memory, "audit"),
        principal.clone(),
    );

    let mut draft = order(Some("o1"), "ana", "open", 30);
    draft.lines = vec![line("sku-1", 1)];
    let created = repo.add(draft).unwrap().unwrap();
    let created_at = created.audit.create_date;

    principal.switch_to(Some("bo"));
    let mut changed = created.clone();
    changed.lines.push(line("sku-3", 3));
    let updated = repo.update(changed).unwrap().unwrap();

    assert_eq!(updated.audit.create_date, created_at);
    assert_eq!(updated.audit.created_by.as_deref(), Some("ana"));
    assert_eq!(updated.audit.updated_by.as_deref(), Some("bo"));
    assert_ne!(updated.audit.audit_id, created.audit.audit_id);

    let existing = &updated.lines[0];
    assert_eq!(existing.audit.create_date, created_at);
    assert_eq!(existing.audit.updated_by.as_deref(), Some("bo"));
    assert_eq!(existing.audit.update_date, updated.audit.update_date);

    let fresh = &updated.lines[1];
    assert!(fresh.audit.create_date.is_some());
    assert_eq!(fresh.audit.created_by.as_deref(), Some("ana"));
    assert!(fresh.audit.updated_by.is_none());
    assert_eq!(fresh.audit.audit_id, updated.audit.audit_id);
}

#[test]
fn bulk_inserts_are_stamped_per_root() {
    let repo = AuditableRepository::new(
        sql_repository(DbLocation::Memory, "audit"),
        Arc::new(NamedPrincipal::new("ana")),
    );
    repo.insert_many(vec![
        order(Some("o1"), "ana", "open", 1),
        order(Some("o2"), "bo", "open", 2),
    ])
    .unwrap();

    let first = repo.get_by_id::<Order>("o1").unwrap().unwrap();
    let second = repo.get_by_id::<Order>("o2").unwrap().unwrap();
    assert!(first.audit.audit_id.is_some());
    assert_ne!(first.audit.audit_id, second.audit.audit_id);
}

#[test]
fn anonymous_principal_leaves_actor_fields_empty() {
    let repo = AuditableRepository::new(
        sql_repository(DbLocation::Memory, "audit"),
        Arc::new(AnonymousPrincipal),
    );
    let added = repo.add(order(Some("o1"), "ana", "open", 1)).unwrap().unwrap();
    assert!(added.audit.created_by.is_none());
    assert!(added.audit.create_date.is_some());
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Account {
    id: String,
    #[serde(default)]
    audit: AuditMetadata,
    #[serde(skip)]
    peer: Option<SharedNode<Account>>,
}

impl AuditNode for Account {
    fn node_id(&self) -> NodeId {
        NodeId::Keyed {
            kind: "accounts",
            key: self.id.clone(),
        }
    }

    fn audit_metadata(&mut self) -> Option<&mut AuditMetadata> {
        Some(&mut self.audit)
    }

    fn children(&mut self, cascade: &mut Cascade) {
        if let Some(peer) = &self.peer {
            cascade.visit_shared(peer);
        }
    }
}

fn account(id: &str) -> Account {
    Account {
        id: id.to_string(),
        ..Account::default()
    }
}

#[test]
fn shared_cycles_are_stamped_once() {
    let a = SharedNode::new(account("a"));
    let b = SharedNode::new(account("b"));
    a.lock().peer = Some(b.clone());
    b.lock().peer = Some(a.clone());

    let now = Utc::now();
    let mut root = a.lock();
    let report = cascade_audit_at(&mut *root, CascadeMode::Create, Some("ana"), now).unwrap();
    drop(root);

    assert_eq!(report.visited, 2);
    assert_eq!(report.stamped, 2);
    assert_eq!(b.lock().audit.audit_id, Some(report.audit_id));
    assert_eq!(b.lock().audit.create_date, Some(now));
    assert_eq!(a.lock().audit.created_by.as_deref(), Some("ana"));

    a.lock().peer = None;
    b.lock().peer = None;
}

#[test]
fn update_cascade_keeps_existing_child_creation() {
    let earlier = Utc::now() - Duration::days(2);
    let now = Utc::now();
    let a = SharedNode::new(account("a"));
    let b = SharedNode::new(Account {
        audit: AuditMetadata {
            create_date: Some(earlier),
            created_by: Some("bo".to_string()),
            ..AuditMetadata::default()
        },
        ..account("b")
    });
    a.lock().peer = Some(b.clone());

    {
        let mut root = a.lock();
        cascade_audit_at(&mut *root, CascadeMode::Update, Some("cy"), now).unwrap();
    }

    let child = b.lock();
    assert_eq!(child.audit.create_date, Some(earlier));
    assert_eq!(child.audit.created_by.as_deref(), Some("bo"));
    assert_eq!(child.audit.updated_by.as_deref(), Some("cy"));
    assert_eq!(child.audit.update_date, Some(now));
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Parcel {
    id: i64,
    weight: i64,
    #[serde(default)]
    audit: AuditMetadata,
}

impl AuditNode for Parcel {
    fn node_id(&self) -> NodeId {
        NodeId::of_entity(self)
    }

    fn audit_metadata(&mut self) -> Option<&mut AuditMetadata> {
        Some(&mut self.audit)
    }
}

impl Entity for Parcel {
    const COLLECTION: &'static str = "parcels";

    fn key(&self) -> Option<EntityKey> {
        Some(EntityKey::single(self.id))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Shipment {
    id: i64,
    parcels: Vec<Parcel>,
    #[serde(default)]
    audit: AuditMetadata,
}

impl AuditNode for Shipment {
    fn node_id(&self) -> NodeId {
        NodeId::of_entity(self)
    }

    fn audit_metadata(&mut self) -> Option<&mut AuditMetadata> {
        Some(&mut self.audit)
    }

    fn children(&mut self, cascade: &mut Cascade) {
        cascade.visit_each(self.parcels.iter_mut());
    }
}

impl Entity for Shipment {
    const COLLECTION: &'static str = "shipments";

    fn key(&self) -> Option<EntityKey> {
        Some(EntityKey::single(self.id))
    }
}

#[test]
fn unsaved_siblings_with_default_keys_are_each_stamped() {
    let mut shipment = Shipment {
        parcels: vec![
            Parcel {
                weight: 3,
                ..Parcel::default()
            },
            Parcel {
                weight: 5,
                ..Parcel::default()
            },
        ],
        ..Shipment::default()
    };

    let now = Utc::now();
    let report = cascade_audit_at(&mut shipment, CascadeMode::Create, Some("ana"), now).unwrap();

    assert_eq!(report.visited, 3);
    assert_eq!(report.stamped, 3);
    for parcel in &shipment.parcels {
        assert_eq!(parcel.audit.audit_id, Some(report.audit_id));
        assert_eq!(parcel.audit.create_date, Some(now));
    }
}
