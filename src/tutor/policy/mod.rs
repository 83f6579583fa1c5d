pub mod intervention;

pub use intervention::{InterventionPolicy, InterventionTrigger};
