use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::info;

use super::{new_id, ModuleStore, RowRecord, StoreError, UserRecord};
use crate::config::StorageConfig;
use crate::schema::{apply_patch, Module, ModuleField, RowValues};
use crate::types::Role;

const CREATE_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS modules (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        fields JSONB NOT NULL DEFAULT '[]'::jsonb,
        seq BIGSERIAL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS module_data (
        id TEXT PRIMARY KEY,
        module TEXT NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
        data JSONB NOT NULL DEFAULT '{}'::jsonb,
        seq BIGSERIAL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS module_data_module_idx ON module_data (module, seq)"#,
    r#"CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
];

const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed store. Tables are created on connect.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &StorageConfig) -> Result<Self, StoreError> {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or(StoreError::ConfigMissing("DATABASE_URL"))?;
        let url = url::Url::parse(database_url).map_err(|_| StoreError::InvalidDatabaseUrl)?;
        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(StoreError::InvalidDatabaseUrl);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url.as_str())
            .await?;

        info!("Created database pool for: {}", url.path().trim_start_matches('/'));

        let store = Self { pool };
        store.ensure_tables().await?;
        Ok(store)
    }

    pub async fn ensure_tables(&self) -> Result<(), StoreError> {
        for statement in CREATE_TABLES {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn module_from_row(row: &PgRow) -> Result<Module, StoreError> {
        let Json(fields): Json<Vec<ModuleField>> = row.try_get("fields")?;
        Ok(Module {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            fields,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    fn record_from_row(row: &PgRow) -> Result<RowRecord, StoreError> {
        let Json(values): Json<RowValues> = row.try_get("data")?;
        Ok(RowRecord {
            key: row.try_get("id")?,
            module_id: row.try_get("module")?,
            values,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn user_from_row(row: &PgRow) -> Result<UserRecord, StoreError> {
        let role: String = row.try_get("role")?;
        Ok(UserRecord {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            role: role.parse().map_err(StoreError::QueryError)?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn ensure_module(&self, id: &str) -> Result<(), StoreError> {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM modules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        exists.map(|_| ()).ok_or_else(|| StoreError::module_not_found(id))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

#[async_trait]
impl ModuleStore for PgStore {
    async fn list_modules(&self) -> Result<Vec<Module>, StoreError> {
        let rows = sqlx::query("SELECT id, name, fields, created_at, updated_at FROM modules ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::module_from_row).collect()
    }

    async fn get_module(&self, id: &str) -> Result<Module, StoreError> {
        let row = sqlx::query("SELECT id, name, fields, created_at, updated_at FROM modules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::module_not_found(id))?;
        Self::module_from_row(&row)
    }

    async fn create_module(&self, name: &str, fields: Vec<ModuleField>) -> Result<Module, StoreError> {
        let row = sqlx::query(
            "INSERT INTO modules (id, name, fields) VALUES ($1, $2, $3) \
             RETURNING id, name, fields, created_at, updated_at",
        )
        .bind(new_id())
        .bind(name)
        .bind(Json(&fields))
        .fetch_one(&self.pool)
        .await?;
        Self::module_from_row(&row)
    }

    async fn update_module(&self, id: &str, name: &str, fields: Vec<ModuleField>) -> Result<Module, StoreError> {
        let row = sqlx::query(
            "UPDATE modules SET name = $2, fields = $3, updated_at = now() WHERE id = $1 \
             RETURNING id, name, fields, created_at, updated_at",
        )
        .bind(id)
        .bind(name)
        .bind(Json(&fields))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::module_not_found(id))?;
        Self::module_from_row(&row)
    }

    async fn delete_module(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM modules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::module_not_found(id));
        }
        Ok(())
    }

    async fn list_rows(&self, module_id: &str) -> Result<Vec<RowRecord>, StoreError> {
        self.ensure_module(module_id).await?;
        let rows = sqlx::query(
            "SELECT id, module, data, created_at, updated_at FROM module_data WHERE module = $1 ORDER BY seq",
        )
        .bind(module_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn get_row(&self, module_id: &str, key: &str) -> Result<RowRecord, StoreError> {
        self.ensure_module(module_id).await?;
        let row = sqlx::query(
            "SELECT id, module, data, created_at, updated_at FROM module_data WHERE module = $1 AND id = $2",
        )
        .bind(module_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::row_not_found(module_id, key))?;
        Self::record_from_row(&row)
    }

    async fn insert_row(&self, module_id: &str, values: RowValues) -> Result<RowRecord, StoreError> {
        self.ensure_module(module_id).await?;
        let row = sqlx::query(
            "INSERT INTO module_data (id, module, data) VALUES ($1, $2, $3) \
             RETURNING id, module, data, created_at, updated_at",
        )
        .bind(new_id())
        .bind(module_id)
        .bind(Json(&values))
        .fetch_one(&self.pool)
        .await?;
        Self::record_from_row(&row)
    }

    async fn replace_row(&self, module_id: &str, key: &str, values: RowValues) -> Result<RowRecord, StoreError> {
        self.ensure_module(module_id).await?;
        let row = sqlx::query(
            "UPDATE module_data SET data = $3, updated_at = now() WHERE module = $1 AND id = $2 \
             RETURNING id, module, data, created_at, updated_at",
        )
        .bind(module_id)
        .bind(key)
        .bind(Json(&values))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::row_not_found(module_id, key))?;
        Self::record_from_row(&row)
    }

    async fn patch_row(
        &self,
        module_id: &str,
        key: &str,
        fields: &[ModuleField],
        changes: RowValues,
    ) -> Result<RowRecord, StoreError> {
        self.ensure_module(module_id).await?;
        let mut tx = self.pool.begin().await?;

        let current: Option<Json<RowValues>> =
            sqlx::query_scalar("SELECT data FROM module_data WHERE module = $1 AND id = $2 FOR UPDATE")
                .bind(module_id)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
        let Json(existing) = current.ok_or_else(|| StoreError::row_not_found(module_id, key))?;
        let merged = apply_patch(fields, &existing, &changes)?;

        let row = sqlx::query(
            "UPDATE module_data SET data = $3, updated_at = now() WHERE module = $1 AND id = $2 \
             RETURNING id, module, data, created_at, updated_at",
        )
        .bind(module_id)
        .bind(key)
        .bind(Json(&merged))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Self::record_from_row(&row)
    }

    async fn delete_row(&self, module_id: &str, key: &str) -> Result<(), StoreError> {
        self.ensure_module(module_id).await?;
        let result = sqlx::query("DELETE FROM module_data WHERE module = $1 AND id = $2")
            .bind(module_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::row_not_found(module_id, key));
        }
        Ok(())
    }

    async fn create_user(&self, username: &str, password_hash: &str, role: Option<Role>) -> Result<UserRecord, StoreError> {
        // A single statement keeps the first-user-is-admin decision atomic
        let result = sqlx::query(
            "INSERT INTO users (id, username, password_hash, role) \
             SELECT $1, $2, $3, COALESCE($4, CASE WHEN EXISTS (SELECT 1 FROM users) THEN 'user' ELSE 'admin' END) \
             RETURNING id, username, password_hash, role, created_at",
        )
        .bind(new_id())
        .bind(username)
        .bind(password_hash)
        .bind(role.map(|r| r.as_str()))
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Self::user_from_row(&row),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::Conflict(format!("username '{}' is taken", username)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query("SELECT id, username, password_hash, role, created_at FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::user_from_row).transpose()
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;
    use sqlx::Executor;
    use std::sync::Arc;

    fn storage(url: Option<&str>) -> StorageConfig {
        StorageConfig {
            backend: crate::config::StorageBackend::Postgres,
            database_url: url.map(str::to_string),
            max_connections: 1,
            connection_timeout: 1,
        }
    }

    #[tokio::test]
    async fn connect_requires_database_url() {
        assert!(matches!(
            PgStore::connect(&storage(None)).await,
            Err(StoreError::ConfigMissing("DATABASE_URL"))
        ));
    }

    #[tokio::test]
    async fn connect_rejects_non_postgres_urls() {
        assert!(matches!(
            PgStore::connect(&storage(Some("mysql://localhost/db"))).await,
            Err(StoreError::InvalidDatabaseUrl)
        ));
        assert!(matches!(
            PgStore::connect(&storage(Some("not a url"))).await,
            Err(StoreError::InvalidDatabaseUrl)
        ));
    }

    /// A store confined to a throwaway schema so live tests can run side by side
    struct LiveDb {
        store: PgStore,
        admin: PgPool,
        schema: String,
    }

    impl LiveDb {
        async fn open() -> LiveDb {
            let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a Postgres database");
            let admin = PgPoolOptions::new().max_connections(1).connect(&url).await.unwrap();
            let schema = format!("cmod_test_{}", new_id());
            admin.execute(format!("CREATE SCHEMA {}", schema).as_str()).await.unwrap();

            let set_path = format!("SET search_path TO {}", schema);
            let pool = PgPoolOptions::new()
                .max_connections(4)
                .after_connect(move |conn, _meta| {
                    let sql = set_path.clone();
                    Box::pin(async move {
                        conn.execute(sql.as_str()).await?;
                        Ok(())
                    })
                })
                .connect(&url)
                .await
                .unwrap();
            let store = PgStore { pool };
            store.ensure_tables().await.unwrap();
            LiveDb { store, admin, schema }
        }

        async fn close(self) {
            self.store.pool.close().await;
            let drop = format!("DROP SCHEMA {} CASCADE", self.schema);
            self.admin.execute(drop.as_str()).await.unwrap();
        }
    }

    fn values(v: serde_json::Value) -> RowValues {
        v.as_object().unwrap().clone()
    }

    fn staff_fields() -> Vec<ModuleField> {
        vec![
            ModuleField::new("姓名", "name", FieldType::String).required(),
            ModuleField::new("级别", "level", FieldType::Number),
            ModuleField::new("部门", "dept", FieldType::String),
        ]
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL and a running Postgres"]
    async fn live_module_and_row_lifecycle() {
        let db = LiveDb::open().await;
        let store = &db.store;

        let module = store.create_module("员工管理", staff_fields()).await.unwrap();
        let fetched = store.get_module(&module.id).await.unwrap();
        assert_eq!(fetched.name, "员工管理");
        assert_eq!(fetched.fields.len(), 3);
        assert_eq!(fetched.fields[0].key, "name");
        assert!(fetched.fields[0].required);

        let renamed = store.update_module(&module.id, "员工", staff_fields()).await.unwrap();
        assert_eq!(renamed.name, "员工");

        let row = store.insert_row(&module.id, values(json!({"name": "张三", "level": 2.5}))).await.unwrap();
        let read = store.get_row(&module.id, &row.key).await.unwrap();
        assert_eq!(read.module_id, module.id);
        assert_eq!(read.values["name"], json!("张三"));
        assert_eq!(read.values["level"], json!(2.5));

        let replaced = store.replace_row(&module.id, &row.key, values(json!({"name": "李四"}))).await.unwrap();
        assert_eq!(replaced.key, row.key);
        assert!(replaced.values.get("level").is_none());

        store.delete_row(&module.id, &row.key).await.unwrap();
        assert!(matches!(store.delete_row(&module.id, &row.key).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.get_row("nope", &row.key).await, Err(StoreError::NotFound(_))));

        db.close().await;
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL and a running Postgres"]
    async fn live_module_delete_cascades_to_rows() {
        let db = LiveDb::open().await;
        let store = &db.store;

        let module = store.create_module("m", staff_fields()).await.unwrap();
        store.insert_row(&module.id, values(json!({"name": "a"}))).await.unwrap();
        store.insert_row(&module.id, values(json!({"name": "b"}))).await.unwrap();

        store.delete_module(&module.id).await.unwrap();
        assert!(matches!(store.list_rows(&module.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete_module(&module.id).await, Err(StoreError::NotFound(_))));

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM module_data WHERE module = $1")
            .bind(&module.id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(orphans, 0);

        db.close().await;
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL and a running Postgres"]
    async fn live_rows_and_modules_keep_insertion_order() {
        let db = LiveDb::open().await;
        let store = &db.store;

        for name in ["c", "a", "b"] {
            store.create_module(name, vec![]).await.unwrap();
        }
        let names: Vec<String> = store.list_modules().await.unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["c", "a", "b"]);

        let module = store.create_module("m", vec![]).await.unwrap();
        for i in 0..5 {
            store.insert_row(&module.id, values(json!({"n": i}))).await.unwrap();
        }
        let rows = store.list_rows(&module.id).await.unwrap();
        let ns: Vec<i64> = rows.iter().map(|r| r.values["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);

        db.close().await;
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL and a running Postgres"]
    async fn live_first_user_becomes_admin_and_duplicates_conflict() {
        let db = LiveDb::open().await;
        let store = &db.store;

        assert_eq!(store.count_users().await.unwrap(), 0);
        let first = store.create_user("alice", "h1", None).await.unwrap();
        let second = store.create_user("bob", "h2", None).await.unwrap();
        let forced = store.create_user("carol", "h3", Some(Role::Admin)).await.unwrap();
        assert_eq!(first.role, Role::Admin);
        assert_eq!(second.role, Role::User);
        assert_eq!(forced.role, Role::Admin);

        assert!(matches!(store.create_user("bob", "h", None).await, Err(StoreError::Conflict(_))));
        assert_eq!(store.count_users().await.unwrap(), 3);

        let found = store.find_user("bob").await.unwrap().unwrap();
        assert_eq!(found.id, second.id);
        assert_eq!(found.password_hash, "h2");
        assert!(store.find_user("nobody").await.unwrap().is_none());

        db.close().await;
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL and a running Postgres"]
    async fn live_concurrent_patches_keep_both_changes() {
        let db = LiveDb::open().await;
        let fields = staff_fields();
        let module = db.store.create_module("m", fields.clone()).await.unwrap();
        let row = db.store.insert_row(&module.id, values(json!({"name": "张三"}))).await.unwrap();

        let store = Arc::new(db.store);
        let mut tasks = Vec::new();
        for i in 0..20 {
            let (store, fields, module_id, key) = (store.clone(), fields.clone(), module.id.clone(), row.key.clone());
            let change = if i % 2 == 0 { json!({"level": i}) } else { json!({"dept": format!("d{}", i)}) };
            tasks.push(tokio::spawn(async move {
                store.patch_row(&module_id, &key, &fields, values(change)).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.get_row(&module.id, &row.key).await.unwrap().values;
        assert_eq!(stored["name"], json!("张三"));
        assert!(stored["level"].is_number());
        assert!(stored["dept"].is_string());

        let rejected = store.patch_row(&module.id, &row.key, &fields, values(json!({"name": null}))).await;
        assert!(matches!(rejected, Err(StoreError::Invalid(_))));
        assert_eq!(store.get_row(&module.id, &row.key).await.unwrap().values["name"], json!("张三"));

        store.pool.close().await;
        let drop = format!("DROP SCHEMA {} CASCADE", db.schema);
        db.admin.execute(drop.as_str()).await.unwrap();
    }
}
