#![allow(dead_code)]

use polystore_core::audit::{AuditMetadata, AuditNode, Cascade, NodeId};
use polystore_core::backend::document::{DocumentEngine, DocumentRepository, DocumentStore};
use polystore_core::backend::search::{SearchIndex, SearchRepository, SearchStore};
use polystore_core::backend::sql::{SqlRepository, SqliteSessionFactory};
use polystore_core::db::DbLocation;
use polystore_core::{ContextCache, DataContext, Entity, EntityKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: i64,
    #[serde(default)]
    pub audit: AuditMetadata,
}

impl AuditNode for OrderLine {
    fn node_id(&self) -> NodeId {
        NodeId::of_ref(self)
    }

    fn audit_metadata(&mut self) -> Option<&mut AuditMetadata> {
        Some(&mut self.audit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Option<String>,
    pub customer: String,
    pub status: String,
    pub total: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon: Option<String>,
    #[serde(default)]
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub audit: AuditMetadata,
}

impl AuditNode for Order {
    fn node_id(&self) -> NodeId {
        NodeId::of_entity(self)
    }

    fn audit_metadata(&mut self) -> Option<&mut AuditMetadata> {
        Some(&mut self.audit)
    }

    fn children(&mut self, cascade: &mut Cascade) {
        cascade.visit_each(self.lines.iter_mut());
    }
}

impl Entity for Order {
    const COLLECTION: &'static str = "orders";

    fn key(&self) -> Option<EntityKey> {
        self.id.as_deref().map(EntityKey::from)
    }

    fn assign_key(&mut self, key: &EntityKey) -> bool {
        self.id = Some(key.storage_key());
        true
    }

    fn audit_node(&mut self) -> Option<&mut dyn AuditNode> {
        Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub region: String,
}

impl Entity for Customer {
    const COLLECTION: &'static str = "customers";

    fn key(&self) -> Option<EntityKey> {
        Some(EntityKey::from(self.id.as_str()))
    }

    fn shard_key(&self) -> Option<String> {
        Some(self.region.clone())
    }
}

pub fn order(id: Option<&str>, customer: &str, status: &str, total: i64) -> Order {
    Order {
        id: id.map(str::to_string),
        customer: customer.to_string(),
        status: status.to_string(),
        total,
        coupon: None,
        lines: Vec::new(),
        audit: AuditMetadata::default(),
    }
}

pub fn line(sku: &str, quantity: i64) -> OrderLine {
    OrderLine {
        sku: sku.to_string(),
        quantity,
        audit: AuditMetadata::default(),
    }
}

pub fn customer(id: &str, name: &str, region: &str) -> Customer {
    Customer {
        id: id.to_string(),
        name: name.to_string(),
        region: region.to_string(),
    }
}

/// A small order set with mixed statuses, totals and one coupon.
pub fn sample_orders() -> Vec<Order> {
    let mut orders = vec![
        order(Some("o1"), "ana", "open", 120),
        order(Some("o2"), "bo", "shipped", 45),
        order(Some("o3"), "ana", "open", 80),
        order(Some("o4"), "cy", "cancelled", 300),
        order(Some("o5"), "bo", "open", 45),
    ];
    orders[3].coupon = Some("SPRING".to_string());
    orders
}

pub fn ids(orders: &[Order]) -> Vec<String> {
    let mut ids = orders
        .iter()
        .filter_map(|order| order.id.clone())
        .collect::<Vec<_>>();
    ids.sort();
    ids
}

pub fn sql_repository(location: DbLocation, scope: &str) -> SqlRepository {
    SqlRepository::new(DataContext::new(
        Arc::new(SqliteSessionFactory::new(location)),
        Arc::new(ContextCache::new()),
        scope,
    ))
}

pub fn document_store() -> Arc<DocumentStore> {
    Arc::new(DocumentStore::single(
        "Document.Default",
        Arc::new(DocumentEngine::new("mem://orders")),
    ))
}

pub fn document_repository(store: &Arc<DocumentStore>, scope: &str) -> DocumentRepository {
    DocumentRepository::new(DataContext::new(
        Arc::clone(store),
        Arc::new(ContextCache::new()),
        scope,
    ))
}

pub fn search_repository(index: &Arc<SearchIndex>) -> SearchRepository {
    SearchRepository::new(DataContext::with_default_scope(
        Arc::new(SearchStore::new("Search.Default", Arc::clone(index))),
        Arc::new(ContextCache::new()),
    ))
}
