// handlers/protected/mod.rs - Protected handlers (JWT authentication required)
//
// Route Prefix: /api/*
// Middleware: JWT validation injects AuthUser; module and row handlers then
// check the matching collection rule.

pub mod auth;        // Session endpoints
pub mod collections; // Migrated collection definitions (admin)
pub mod modules;     // Module definitions and their rows
