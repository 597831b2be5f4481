// handlers/mod.rs - Handler tiers
//
// Public (no auth) → Protected (JWT auth, collection rules) → pages (navigation guard)
pub mod pages;
pub mod protected; // JWT authentication required (/api/*)
pub mod public;    // No authentication required (/auth/*)
