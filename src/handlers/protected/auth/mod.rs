pub mod session;

pub use session::{logout, refresh, whoami};
