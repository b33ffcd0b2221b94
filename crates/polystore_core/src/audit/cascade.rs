//! Depth-first audit stamping.

use super::{AuditMetadata, AuditNode, NodeId, SharedNode};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashSet;
use uuid::Uuid;

/// Which mutation the cascade is stamping for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeMode {
    Create,
    Update,
}

impl CascadeMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

/// Summary of one completed cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeReport {
    pub audit_id: Uuid,
    /// Nodes entered, including the root and pass-through nodes.
    pub visited: usize,
    /// Nodes whose audit fields were written, including the root.
    pub stamped: usize,
}

/// Traversal state handed to `AuditNode::children`.
pub struct Cascade {
    mode: CascadeMode,
    root: AuditMetadata,
    now: DateTime<Utc>,
    visited: HashSet<NodeId>,
    stamped: usize,
}

impl Cascade {
    pub fn mode(&self) -> CascadeMode {
        self.mode
    }

    /// Root audit fields as stamped at the start of this cascade.
    pub fn root(&self) -> &AuditMetadata {
        &self.root
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Visits one owned child. Already visited nodes are skipped.
    pub fn visit(&mut self, node: &mut dyn AuditNode) {
        if self.visited.insert(node.node_id()) {
            self.enter(node);
        }
    }

    /// Visits every owned child in iteration order.
    pub fn visit_each<'a, N, I>(&mut self, nodes: I)
    where
        N: AuditNode + 'a,
        I: IntoIterator<Item = &'a mut N>,
    {
        for node in nodes {
            self.visit(node);
        }
    }

    /// Visits a shared child. The identity check happens before locking, so
    /// cycles through shared nodes terminate without re-entering a lock.
    pub fn visit_shared<N: AuditNode>(&mut self, node: &SharedNode<N>) {
        if !self.visited.insert(node.id().clone()) {
            return;
        }
        let mut guard = node.lock();
        self.enter(&mut *guard);
    }

    fn enter(&mut self, node: &mut dyn AuditNode) {
        if let Some(metadata) = node.audit_metadata() {
            apply_inherited(self.mode, &self.root, self.now, metadata);
            self.stamped += 1;
        }
        node.children(self);
    }
}

fn apply_inherited(
    mode: CascadeMode,
    root: &AuditMetadata,
    now: DateTime<Utc>,
    item: &mut AuditMetadata,
) {
    match mode {
        CascadeMode::Create => {
            if item.create_date.is_none() {
                item.create_date = root.create_date;
                item.created_by = root.created_by.clone();
            }
        }
        CascadeMode::Update => {
            if item.create_date.is_none() {
                item.create_date = Some(now);
                item.created_by = root.created_by.clone();
            } else {
                item.update_date = root.update_date;
                item.updated_by = root.updated_by.clone();
            }
        }
    }
    item.audit_id = root.audit_id;
}

/// Stamps `root` for `mode` and cascades through its graph at the current
/// time.
///
/// Returns `None` when the root carries no audit metadata; the graph is then
/// left untouched.
pub fn cascade_audit(
    root: &mut dyn AuditNode,
    mode: CascadeMode,
    actor: Option<&str>,
) -> Option<CascadeReport> {
    cascade_audit_at(root, mode, actor, Utc::now())
}

/// Same as `cascade_audit` with an explicit clock reading.
pub fn cascade_audit_at(
    root: &mut dyn AuditNode,
    mode: CascadeMode,
    actor: Option<&str>,
    now: DateTime<Utc>,
) -> Option<CascadeReport> {
    let root_id = root.node_id();
    let snapshot = {
        let metadata = root.audit_metadata()?;
        metadata.audit_id = Some(Uuid::new_v4());
        match mode {
            CascadeMode::Create => {
                metadata.create_date = Some(now);
                if let Some(actor) = actor {
                    metadata.created_by = Some(actor.to_string());
                }
            }
            CascadeMode::Update => {
                metadata.update_date = Some(now);
                if let Some(actor) = actor {
                    metadata.updated_by = Some(actor.to_string());
                }
            }
        }
        metadata.clone()
    };
    let audit_id = snapshot.audit_id.unwrap_or_default();

    let mut cascade = Cascade {
        mode,
        root: snapshot,
        now,
        visited: HashSet::from([root_id]),
        stamped: 1,
    };
    root.children(&mut cascade);

    debug!(
        "event=audit_cascade module=audit status=ok mode={} audit_id={} visited={} stamped={}",
        mode.as_str(),
        audit_id,
        cascade.visited.len(),
        cascade.stamped
    );
    Some(CascadeReport {
        audit_id,
        visited: cascade.visited.len(),
        stamped: cascade.stamped,
    })
}

#[cfg(test)]
mod tests {
    use super::{cascade_audit_at, CascadeMode};
    use crate::audit::{AuditMetadata, AuditNode, Cascade, NodeId};
    use chrono::{Duration, Utc};

    struct Leaf {
        audit: AuditMetadata,
    }

    impl AuditNode for Leaf {
        fn node_id(&self) -> NodeId {
            NodeId::of_ref(self)
        }

        fn audit_metadata(&mut self) -> Option<&mut AuditMetadata> {
            Some(&mut self.audit)
        }
    }

    struct Root {
        audit: Option<AuditMetadata>,
        leaves: Vec<Leaf>,
    }

    impl AuditNode for Root {
        fn node_id(&self) -> NodeId {
            NodeId::of_ref(self)
        }

        fn audit_metadata(&mut self) -> Option<&mut AuditMetadata> {
            self.audit.as_mut()
        }

        fn children(&mut self, cascade: &mut Cascade) {
            cascade.visit_each(self.leaves.iter_mut());
        }
    }

    #[test]
    fn root_without_metadata_is_left_untouched() {
        let mut root = Root {
            audit: None,
            leaves: vec![Leaf {
                audit: AuditMetadata::default(),
            }],
        };

        let report = cascade_audit_at(&mut root, CascadeMode::Create, Some("ana"), Utc::now());
        assert!(report.is_none());
        assert_eq!(root.leaves[0].audit, AuditMetadata::default());
    }

    #[test]
    fn create_keeps_existing_child_create_date() {
        let now = Utc::now();
        let earlier = now - Duration::days(3);
        let mut root = Root {
            audit: Some(AuditMetadata::default()),
            leaves: vec![
                Leaf {
                    audit: AuditMetadata::default(),
                },
                Leaf {
                    audit: AuditMetadata {
                        create_date: Some(earlier),
                        created_by: Some("bob".to_string()),
                        ..AuditMetadata::default()
                    },
                },
            ],
        };

        let report = cascade_audit_at(&mut root, CascadeMode::Create, Some("ana"), now)
            .expect("root is auditable");

        assert_eq!(report.stamped, 3);
        assert_eq!(root.leaves[0].audit.create_date, Some(now));
        assert_eq!(root.leaves[0].audit.created_by.as_deref(), Some("ana"));
        assert_eq!(root.leaves[1].audit.create_date, Some(earlier));
        assert_eq!(root.leaves[1].audit.created_by.as_deref(), Some("bob"));
        assert_eq!(root.leaves[1].audit.audit_id, Some(report.audit_id));
    }
}
