use std::sync::Arc;

use uuid::Uuid;

use super::repo::{DirectoryError, UserDirectory};

/// Kinds of record that receive prefixed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Carrier,
    Product,
    Rule,
    Organization,
}

impl EntityKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::User => "usr",
            EntityKind::Carrier => "car",
            EntityKind::Product => "prod",
            EntityKind::Rule => "rul",
            EntityKind::Organization => "org",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// `prefix-NNN` from the current row count. Two concurrent callers can
    /// observe the same count and produce the same id.
    Sequential,
    /// `prefix-xxxxxxxx` from a random v4 uuid.
    Random,
}

pub fn sequential_id(kind: EntityKind, existing: i64) -> String {
    format!("{}-{:03}", kind.prefix(), existing + 1)
}

pub fn random_id(kind: EntityKind) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}", kind.prefix(), &hex[..8])
}

#[derive(Clone)]
pub struct IdGenerator {
    directory: Arc<dyn UserDirectory>,
}

impl IdGenerator {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    pub async fn generate(&self, kind: EntityKind, strategy: IdStrategy) -> Result<String, DirectoryError> {
        match strategy {
            IdStrategy::Sequential => {
                let count = self.directory.count_by_kind(kind).await?;
                Ok(sequential_id(kind, count))
            }
            IdStrategy::Random => Ok(random_id(kind)),
        }
    }
}
