pub mod bkt;

pub use bkt::KnowledgeTracker;
