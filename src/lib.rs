pub mod config;
pub mod error;
pub mod logging;
pub mod tutor;

pub use error::{TutorError, TutorResult};
pub use tutor::{TutorConfig, TutorSession};
