use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::auth::{hash_password, validate_password, validate_username};
use crate::collections::{CollectionError, CollectionRegistry, Migrator};
use crate::config::{AppConfig, SecurityConfig, StorageBackend, StorageConfig};
use crate::error::ApiError;
use crate::handlers;
use crate::middleware::{jwt_auth_middleware, require_admin, AuthUser};
use crate::navigation::RouteTable;
use crate::store::{seed::seed_demo_data, MemoryStore, ModuleStore, PgStore, StoreError};
use crate::types::{Operation, Role};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ModuleStore>,
    pub config: Arc<AppConfig>,
    pub collections: Arc<CollectionRegistry>,
    pub routes: Arc<RouteTable>,
}

impl AppState {
    /// Build state with every built-in collection migration applied
    pub fn new(store: Arc<dyn ModuleStore>, config: AppConfig) -> Result<Self, CollectionError> {
        let mut migrator = Migrator::builtin();
        let applied = migrator.apply_all()?;
        info!("Collections ready ({} migrations applied)", applied);

        Ok(Self {
            store,
            config: Arc::new(config),
            collections: Arc::new(migrator.into_registry()),
            routes: Arc::new(RouteTable::admin_panel()),
        })
    }

    /// Enforce a collection rule for the calling user
    pub fn authorize(&self, collection: &str, operation: Operation, user: &AuthUser) -> Result<(), ApiError> {
        let auth = user.request_auth();
        if self.collections.allows(collection, operation, Some(&auth))? {
            return Ok(());
        }
        warn!("Denied {:?} on '{}' for '{}'", operation, collection, user.username);
        Err(ApiError::forbidden(format!(
            "Not allowed to {} {}",
            operation_verb(operation),
            collection
        )))
    }
}

fn operation_verb(operation: Operation) -> &'static str {
    match operation {
        Operation::List => "list",
        Operation::View => "view",
        Operation::Create => "create",
        Operation::Update => "update",
        Operation::Delete => "delete",
    }
}

/// Open the configured storage backend
pub async fn connect_store(config: &StorageConfig) -> Result<Arc<dyn ModuleStore>, StoreError> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => Ok(Arc::new(PgStore::connect(config).await?)),
    }
}

/// Create the configured bootstrap admin and load demo data
pub async fn bootstrap(state: &AppState) -> anyhow::Result<()> {
    let settings = &state.config.bootstrap;

    if let (Some(username), Some(password)) = (&settings.admin_username, &settings.admin_password) {
        if state.store.find_user(username).await?.is_none() {
            validate_username(username)?;
            validate_password(password, state.config.security.min_password_length)?;
            state
                .store
                .create_user(username, &hash_password(password), Some(Role::Admin))
                .await?;
            info!("Created bootstrap admin '{}'", username);
        }
    }

    if state.store.count_users().await? == 0 {
        info!("No accounts yet; the first user to register becomes admin");
    }

    if settings.seed_demo_data {
        seed_demo_data(state.store.as_ref()).await?;
    }
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        .merge(auth_public_routes())
        // Protected API
        .merge(protected_routes(state.clone()))
        .merge(admin_routes(state.clone()))
        // Everything else is a page
        .fallback(handlers::pages::navigate)
        .layer(cors_layer(&state.config.security));

    if state.config.server.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }

    app.with_state(state)
}

fn auth_public_routes() -> Router<AppState> {
    use handlers::public::auth;

    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
}

fn protected_routes(state: AppState) -> Router<AppState> {
    use handlers::protected::{auth, modules};

    Router::new()
        // Session management for authenticated users
        .route("/api/auth/whoami", get(auth::whoami))
        .route("/api/auth/refresh", put(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        // Module definitions
        .route("/api/modules", get(modules::module_list).post(modules::module_create))
        .route(
            "/api/modules/:id",
            get(modules::module_get)
                .put(modules::module_update)
                .delete(modules::module_delete),
        )
        // Module rows
        .route("/api/modules/:id/rows", get(modules::row_list).post(modules::row_create))
        .route(
            "/api/modules/:id/rows/:key",
            get(modules::row_get)
                .put(modules::row_replace)
                .patch(modules::row_patch)
                .delete(modules::row_delete),
        )
        .route_layer(middleware::from_fn_with_state(state, jwt_auth_middleware))
}

fn admin_routes(state: AppState) -> Router<AppState> {
    use handlers::protected::collections;

    Router::new()
        .route("/api/collections", get(collections::collection_list))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state, jwt_auth_middleware))
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    if !security.enable_cors {
        return CorsLayer::new();
    }
    if security.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Browsers asking for HTML get the page guard; API clients get the service summary
async fn root(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let wants_html = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |accept| accept.contains("text/html"));
    if wants_html {
        return handlers::pages::resolve_page(&state, &headers, "/");
    }

    Json(json!({
        "success": true,
        "data": {
            "name": "Custom Modules API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Dynamic tables with typed fields, compute formulas and role-based access",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "public_auth": "/auth/register, /auth/login (public - token acquisition)",
                "auth": "/api/auth/whoami, /api/auth/refresh, /api/auth/logout (protected)",
                "modules": "/api/modules[/:id] (protected)",
                "rows": "/api/modules/:id/rows[/:key] (protected)",
                "collections": "/api/collections (admin)",
                "pages": "/login, /register, /admin/* (navigation guard)",
            }
        }
    }))
    .into_response()
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "storage": "ok"
                }
            })),
        ),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "storage unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now
                    }
                })),
            )
        }
    }
}
