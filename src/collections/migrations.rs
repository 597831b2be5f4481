use serde::Serialize;
use tracing::info;

use super::{AccessRule, Collection, CollectionError, CollectionField, CollectionFieldType, CollectionRegistry};
use super::{MODULES, MODULE_DATA, USERS};

pub const USERS_ID: &str = "_pb_users_auth_";
pub const MODULES_ID: &str = "pbc_3219405885";
pub const MODULE_DATA_ID: &str = "pbc_3879638299";

const MODULE_RELATION_ID: &str = "relation1542800728";
const AUTHENTICATED: &str = r#"@request.auth.id != """#;
const ADMIN_ONLY: &str = r#"@request.auth.role = "admin""#;

pub type MigrationFn = fn(&mut CollectionRegistry) -> Result<(), CollectionError>;

/// One reversible change to the collection definitions
#[derive(Clone)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: MigrationFn,
    pub down: MigrationFn,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: &'static str,
    pub applied: bool,
}

/// Applies migrations in version order and tracks which ones ran
pub struct Migrator {
    migrations: Vec<Migration>,
    applied: Vec<i64>,
    registry: CollectionRegistry,
}

impl Migrator {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self {
            migrations,
            applied: Vec::new(),
            registry: CollectionRegistry::new(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_migrations())
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> CollectionRegistry {
        self.registry
    }

    /// Apply every pending migration. Returns how many ran.
    pub fn apply_all(&mut self) -> Result<usize, CollectionError> {
        self.apply_until(i64::MAX)
    }

    /// Apply pending migrations with `version <= target`
    pub fn apply_until(&mut self, target: i64) -> Result<usize, CollectionError> {
        let pending: Vec<Migration> = self
            .migrations
            .iter()
            .filter(|m| m.version <= target && !self.applied.contains(&m.version))
            .cloned()
            .collect();

        for migration in &pending {
            (migration.up)(&mut self.registry)?;
            self.applied.push(migration.version);
            info!("Applied migration {}_{}", migration.version, migration.name);
        }
        Ok(pending.len())
    }

    /// Roll back the most recently applied migration
    pub fn revert_last(&mut self) -> Result<Option<i64>, CollectionError> {
        let Some(&version) = self.applied.last() else {
            return Ok(None);
        };
        let migration = self
            .migrations
            .iter()
            .find(|m| m.version == version)
            .ok_or(CollectionError::UnknownMigration(version))?;

        (migration.down)(&mut self.registry)?;
        self.applied.pop();
        info!("Reverted migration {}_{}", migration.version, migration.name);
        Ok(Some(version))
    }

    pub fn status(&self) -> Vec<MigrationStatus> {
        self.migrations
            .iter()
            .map(|m| MigrationStatus {
                version: m.version,
                name: m.name,
                applied: self.applied.contains(&m.version),
            })
            .collect()
    }
}

pub fn builtin_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1767440000,
            name: "init_collections",
            up: init_collections_up,
            down: init_collections_down,
        },
        Migration {
            version: 1767445503,
            name: "updated_modules",
            up: updated_modules_up,
            down: updated_modules_down,
        },
        Migration {
            version: 1767446023,
            name: "updated_module_data",
            up: updated_module_data_up,
            down: updated_module_data_down,
        },
    ]
}

fn init_collections_up(registry: &mut CollectionRegistry) -> Result<(), CollectionError> {
    let mut users = Collection::new(USERS_ID, USERS);
    users.create_rule = AccessRule::Public;
    users.fields = vec![
        CollectionField::text("text_username", "username", true),
        CollectionField {
            hidden: true,
            required: true,
            ..CollectionField::of_type("password_hash", "password", CollectionFieldType::Password)
        },
        CollectionField::text("text_role", "role", true),
    ];
    registry.create(users)?;

    let mut modules = Collection::new(MODULES_ID, MODULES);
    modules.list_rule = AccessRule::expr(AUTHENTICATED);
    modules.view_rule = AccessRule::Public;
    modules.create_rule = AccessRule::expr(ADMIN_ONLY);
    modules.update_rule = AccessRule::expr(ADMIN_ONLY);
    modules.fields = vec![
        CollectionField::text("text_name", "name", true),
        CollectionField::of_type("json_fields", "fields", CollectionFieldType::Json),
    ];
    registry.create(modules)?;

    let mut module_data = Collection::new(MODULE_DATA_ID, MODULE_DATA);
    for rule in [
        &mut module_data.list_rule,
        &mut module_data.view_rule,
        &mut module_data.create_rule,
        &mut module_data.update_rule,
        &mut module_data.delete_rule,
    ] {
        *rule = AccessRule::expr(AUTHENTICATED);
    }
    module_data.fields = vec![
        CollectionField::of_type("json_data", "data", CollectionFieldType::Json),
        CollectionField::relation(MODULE_RELATION_ID, "field", MODULES_ID),
    ];
    registry.create(module_data)
}

fn init_collections_down(registry: &mut CollectionRegistry) -> Result<(), CollectionError> {
    for name in [MODULE_DATA, MODULES, USERS] {
        registry.drop_collection(name)?;
    }
    Ok(())
}

fn updated_modules_up(registry: &mut CollectionRegistry) -> Result<(), CollectionError> {
    let mut collection = registry.find(MODULES_ID)?.clone();
    collection.delete_rule = AccessRule::expr(AUTHENTICATED);
    collection.view_rule = AccessRule::expr(AUTHENTICATED);
    registry.save(collection)
}

fn updated_modules_down(registry: &mut CollectionRegistry) -> Result<(), CollectionError> {
    let mut collection = registry.find(MODULES_ID)?.clone();
    collection.delete_rule = AccessRule::Locked;
    collection.view_rule = AccessRule::Public;
    registry.save(collection)
}

fn updated_module_data_up(registry: &mut CollectionRegistry) -> Result<(), CollectionError> {
    let mut collection = registry.find(MODULE_DATA_ID)?.clone();
    collection.add_field_at(1, CollectionField::relation(MODULE_RELATION_ID, "module", MODULES_ID))?;
    registry.save(collection)
}

fn updated_module_data_down(registry: &mut CollectionRegistry) -> Result<(), CollectionError> {
    let mut collection = registry.find(MODULE_DATA_ID)?.clone();
    collection.add_field_at(1, CollectionField::relation(MODULE_RELATION_ID, "field", MODULES_ID))?;
    registry.save(collection)
}
