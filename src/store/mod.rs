//! Persistence for modules, their rows and user accounts.
//!
//! Handlers only see [`ModuleStore`]; the in-memory and Postgres backends are
//! interchangeable behind it.

pub mod memory;
pub mod postgres;
pub mod seed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{Module, ModuleField, RowValues, SchemaError};
use crate::types::Role;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Invalid(#[from] SchemaError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl StoreError {
    pub fn module_not_found(id: &str) -> Self {
        StoreError::NotFound(format!("module {}", id))
    }

    pub fn row_not_found(module_id: &str, key: &str) -> Self {
        StoreError::NotFound(format!("row {} in module {}", key, module_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRecord {
    pub key: String,
    pub module_id: String,
    pub values: RowValues,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ModuleStore: Send + Sync {
    /// Modules in creation order
    async fn list_modules(&self) -> Result<Vec<Module>, StoreError>;
    async fn get_module(&self, id: &str) -> Result<Module, StoreError>;
    async fn create_module(&self, name: &str, fields: Vec<ModuleField>) -> Result<Module, StoreError>;
    async fn update_module(&self, id: &str, name: &str, fields: Vec<ModuleField>) -> Result<Module, StoreError>;
    /// Removes the module and every row it owns
    async fn delete_module(&self, id: &str) -> Result<(), StoreError>;

    /// Rows in insertion order
    async fn list_rows(&self, module_id: &str) -> Result<Vec<RowRecord>, StoreError>;
    async fn get_row(&self, module_id: &str, key: &str) -> Result<RowRecord, StoreError>;
    async fn insert_row(&self, module_id: &str, values: RowValues) -> Result<RowRecord, StoreError>;
    async fn replace_row(&self, module_id: &str, key: &str, values: RowValues) -> Result<RowRecord, StoreError>;
    /// Merges normalized `changes` into the stored values as one atomic step;
    /// a `null` change clears the value. Required `fields` are re-checked
    /// against the merged result.
    async fn patch_row(
        &self,
        module_id: &str,
        key: &str,
        fields: &[ModuleField],
        changes: RowValues,
    ) -> Result<RowRecord, StoreError>;
    async fn delete_row(&self, module_id: &str, key: &str) -> Result<(), StoreError>;

    /// `role: None` makes the account an admin when it is the first one, a user otherwise.
    async fn create_user(&self, username: &str, password_hash: &str, role: Option<Role>) -> Result<UserRecord, StoreError>;
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn count_users(&self) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
