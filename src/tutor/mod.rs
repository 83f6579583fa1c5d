pub mod config;
pub mod decision;
pub mod knowledge;
pub mod policy;
pub mod session;
pub mod store;
pub mod types;

pub use config::TutorConfig;
pub use session::TutorSession;
pub use types::*;
