//! Ambient actor identity.

use std::sync::{Arc, RwLock};

/// Source of the acting identity recorded in audit fields.
pub trait Principal: Send + Sync {
    /// Current identity name, or `None` when acting anonymously.
    fn identity_name(&self) -> Option<String>;
}

/// No identity; audit `*_by` fields are left as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousPrincipal;

impl Principal for AnonymousPrincipal {
    fn identity_name(&self) -> Option<String> {
        None
    }
}

/// A fixed identity name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPrincipal(String);

impl NamedPrincipal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Principal for NamedPrincipal {
    fn identity_name(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Identity that can change between operations, e.g. per request.
#[derive(Debug, Default)]
pub struct SwitchablePrincipal {
    current: RwLock<Option<String>>,
}

impl SwitchablePrincipal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn switch_to(&self, name: Option<&str>) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = name.map(str::to_string);
    }
}

impl Principal for SwitchablePrincipal {
    fn identity_name(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
