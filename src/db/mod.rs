//! MongoDB persistence

pub mod journal;
pub mod mongo;
pub mod schemas;

pub use journal::MongoJournal;
pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
