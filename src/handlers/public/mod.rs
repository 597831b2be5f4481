// handlers/public/mod.rs - Public handlers (no authentication required)
//
// Token acquisition endpoints under /auth/*.
pub mod auth;
