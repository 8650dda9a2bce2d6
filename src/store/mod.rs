mod session_store;
mod store_worker;
mod types;

pub use session_store::{SessionStore, SessionStoreHandle};
pub use store_worker::DELETE_ATTEMPTS;
