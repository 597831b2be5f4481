//! Backing collections (`users`, `modules`, `module_data`), their access
//! rules and field layout, evolved by declarative migrations.

pub mod migrations;
pub mod rule;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Operation;

pub use migrations::{Migration, MigrationStatus, Migrator};
pub use rule::{AccessRule, RequestAuth, RuleError};

pub const USERS: &str = "users";
pub const MODULES: &str = "modules";
pub const MODULE_DATA: &str = "module_data";

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("collection '{0}' not found")]
    NotFound(String),

    #[error("collection '{0}' already exists")]
    AlreadyExists(String),

    #[error("field index {index} out of bounds for collection '{collection}'")]
    FieldIndex { collection: String, index: usize },

    #[error("invalid rule on '{collection}': {source}")]
    InvalidRule { collection: String, source: RuleError },

    #[error("migration {0} is not registered")]
    UnknownMigration(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionFieldType {
    Text,
    Json,
    Relation,
    Date,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: CollectionFieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub hidden: bool,
    /// Target collection for relation fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub cascade_delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_select: Option<u32>,
}

impl CollectionField {
    pub fn text(id: &str, name: &str, required: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            field_type: CollectionFieldType::Text,
            required,
            hidden: false,
            collection_id: None,
            cascade_delete: false,
            max_select: None,
        }
    }

    pub fn of_type(id: &str, name: &str, field_type: CollectionFieldType) -> Self {
        Self { field_type, ..Self::text(id, name, false) }
    }

    pub fn relation(id: &str, name: &str, collection_id: &str) -> Self {
        Self {
            collection_id: Some(collection_id.to_string()),
            max_select: Some(1),
            ..Self::of_type(id, name, CollectionFieldType::Relation)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub list_rule: AccessRule,
    pub view_rule: AccessRule,
    pub create_rule: AccessRule,
    pub update_rule: AccessRule,
    pub delete_rule: AccessRule,
    pub fields: Vec<CollectionField>,
}

impl Collection {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            list_rule: AccessRule::Locked,
            view_rule: AccessRule::Locked,
            create_rule: AccessRule::Locked,
            update_rule: AccessRule::Locked,
            delete_rule: AccessRule::Locked,
            fields: Vec::new(),
        }
    }

    pub fn rule(&self, operation: Operation) -> &AccessRule {
        match operation {
            Operation::List => &self.list_rule,
            Operation::View => &self.view_rule,
            Operation::Create => &self.create_rule,
            Operation::Update => &self.update_rule,
            Operation::Delete => &self.delete_rule,
        }
    }

    pub fn field(&self, name: &str) -> Option<&CollectionField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Insert at `index`, replacing any field with the same id
    pub fn add_field_at(&mut self, index: usize, field: CollectionField) -> Result<(), CollectionError> {
        self.fields.retain(|f| f.id != field.id);
        if index > self.fields.len() {
            return Err(CollectionError::FieldIndex { collection: self.name.clone(), index });
        }
        self.fields.insert(index, field);
        Ok(())
    }

    fn validate_rules(&self) -> Result<(), CollectionError> {
        for rule in [&self.list_rule, &self.view_rule, &self.create_rule, &self.update_rule, &self.delete_rule] {
            rule::validate(rule).map_err(|source| CollectionError::InvalidRule {
                collection: self.name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Current collection definitions, as produced by the applied migrations
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionRegistry {
    collections: Vec<Collection>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> &[Collection] {
        &self.collections
    }

    pub fn find(&self, name_or_id: &str) -> Result<&Collection, CollectionError> {
        self.collections
            .iter()
            .find(|c| c.id == name_or_id || c.name == name_or_id)
            .ok_or_else(|| CollectionError::NotFound(name_or_id.to_string()))
    }

    pub fn find_mut(&mut self, name_or_id: &str) -> Result<&mut Collection, CollectionError> {
        self.collections
            .iter_mut()
            .find(|c| c.id == name_or_id || c.name == name_or_id)
            .ok_or_else(|| CollectionError::NotFound(name_or_id.to_string()))
    }

    pub fn create(&mut self, collection: Collection) -> Result<(), CollectionError> {
        if self.find(&collection.id).is_ok() || self.find(&collection.name).is_ok() {
            return Err(CollectionError::AlreadyExists(collection.name));
        }
        collection.validate_rules()?;
        self.collections.push(collection);
        Ok(())
    }

    /// Replace the stored definition with the same id
    pub fn save(&mut self, collection: Collection) -> Result<(), CollectionError> {
        collection.validate_rules()?;
        let slot = self.find_mut(&collection.id)?;
        *slot = collection;
        Ok(())
    }

    pub fn drop_collection(&mut self, name_or_id: &str) -> Result<(), CollectionError> {
        let before = self.collections.len();
        self.collections.retain(|c| c.id != name_or_id && c.name != name_or_id);
        if self.collections.len() == before {
            return Err(CollectionError::NotFound(name_or_id.to_string()));
        }
        Ok(())
    }

    /// Evaluate the collection's rule for `operation`. Rules that fail to
    /// parse deny access.
    pub fn allows(&self, collection: &str, operation: Operation, auth: Option<&RequestAuth>) -> Result<bool, CollectionError> {
        let collection = self.find(collection)?;
        match collection.rule(operation).allows(auth) {
            Ok(allowed) => Ok(allowed),
            Err(e) => {
                tracing::error!("Rule for {:?} on '{}' failed to evaluate: {}", operation, collection.name, e);
                Ok(false)
            }
        }
    }
}
