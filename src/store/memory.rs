use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{new_id, ModuleStore, RowRecord, StoreError, UserRecord};
use crate::schema::{apply_patch, Module, ModuleField, RowValues};
use crate::types::Role;

#[derive(Default)]
struct Inner {
    modules: Vec<Module>,
    rows: HashMap<String, Vec<RowRecord>>,
    users: HashMap<String, UserRecord>,
}

/// Process-local store; everything is lost on restart
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModuleStore for MemoryStore {
    async fn list_modules(&self) -> Result<Vec<Module>, StoreError> {
        Ok(self.inner.read().await.modules.clone())
    }

    async fn get_module(&self, id: &str) -> Result<Module, StoreError> {
        let inner = self.inner.read().await;
        inner
            .modules
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| StoreError::module_not_found(id))
    }

    async fn create_module(&self, name: &str, fields: Vec<ModuleField>) -> Result<Module, StoreError> {
        let now = Utc::now();
        let module = Module {
            id: new_id(),
            name: name.to_string(),
            fields,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.rows.insert(module.id.clone(), Vec::new());
        inner.modules.push(module.clone());
        Ok(module)
    }

    async fn update_module(&self, id: &str, name: &str, fields: Vec<ModuleField>) -> Result<Module, StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner
            .modules
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::module_not_found(id))?;
        module.name = name.to_string();
        module.fields = fields;
        module.updated_at = Utc::now();
        Ok(module.clone())
    }

    async fn delete_module(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.modules.len();
        inner.modules.retain(|m| m.id != id);
        if inner.modules.len() == before {
            return Err(StoreError::module_not_found(id));
        }
        inner.rows.remove(id);
        Ok(())
    }

    async fn list_rows(&self, module_id: &str) -> Result<Vec<RowRecord>, StoreError> {
        let inner = self.inner.read().await;
        inner
            .rows
            .get(module_id)
            .cloned()
            .ok_or_else(|| StoreError::module_not_found(module_id))
    }

    async fn get_row(&self, module_id: &str, key: &str) -> Result<RowRecord, StoreError> {
        let inner = self.inner.read().await;
        let rows = inner
            .rows
            .get(module_id)
            .ok_or_else(|| StoreError::module_not_found(module_id))?;
        rows.iter()
            .find(|r| r.key == key)
            .cloned()
            .ok_or_else(|| StoreError::row_not_found(module_id, key))
    }

    async fn insert_row(&self, module_id: &str, values: RowValues) -> Result<RowRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let rows = inner
            .rows
            .get_mut(module_id)
            .ok_or_else(|| StoreError::module_not_found(module_id))?;
        let now = Utc::now();
        let record = RowRecord {
            key: new_id(),
            module_id: module_id.to_string(),
            values,
            created_at: now,
            updated_at: now,
        };
        rows.push(record.clone());
        Ok(record)
    }

    async fn replace_row(&self, module_id: &str, key: &str, values: RowValues) -> Result<RowRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let rows = inner
            .rows
            .get_mut(module_id)
            .ok_or_else(|| StoreError::module_not_found(module_id))?;
        let row = rows
            .iter_mut()
            .find(|r| r.key == key)
            .ok_or_else(|| StoreError::row_not_found(module_id, key))?;
        row.values = values;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn patch_row(
        &self,
        module_id: &str,
        key: &str,
        fields: &[ModuleField],
        changes: RowValues,
    ) -> Result<RowRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let rows = inner
            .rows
            .get_mut(module_id)
            .ok_or_else(|| StoreError::module_not_found(module_id))?;
        let row = rows
            .iter_mut()
            .find(|r| r.key == key)
            .ok_or_else(|| StoreError::row_not_found(module_id, key))?;
        row.values = apply_patch(fields, &row.values, &changes)?;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete_row(&self, module_id: &str, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let rows = inner
            .rows
            .get_mut(module_id)
            .ok_or_else(|| StoreError::module_not_found(module_id))?;
        let before = rows.len();
        rows.retain(|r| r.key != key);
        if rows.len() == before {
            return Err(StoreError::row_not_found(module_id, key));
        }
        Ok(())
    }

    async fn create_user(&self, username: &str, password_hash: &str, role: Option<Role>) -> Result<UserRecord, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.users.contains_key(username) {
            return Err(StoreError::Conflict(format!("username '{}' is taken", username)));
        }
        let role = role.unwrap_or(if inner.users.is_empty() { Role::Admin } else { Role::User });
        let user = UserRecord {
            id: new_id(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role,
            created_at: Utc::now(),
        };
        inner.users.insert(username.to_string(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.read().await.users.get(username).cloned())
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        Ok(self.inner.read().await.users.len() as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
