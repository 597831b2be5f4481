pub mod auth;
pub mod response;

pub use auth::{extract_page_token, jwt_auth_middleware, require_admin, AuthUser};
pub use response::{ApiJson, ApiResponse, ApiResult};
