// handlers/protected/modules/mod.rs - Module definitions and their rows
//
// /api/modules[/:id]            → `modules` collection rules
// /api/modules/:id/rows[/:key]  → `module_data` collection rules

pub mod module;
pub mod row;

pub use module::{module_create, module_delete, module_get, module_list, module_update};
pub use row::{row_create, row_delete, row_get, row_list, row_patch, row_replace};
