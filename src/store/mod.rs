//! In-memory record storage and the persistence seam

pub mod journal;
pub mod table;

pub use journal::{Change, Journal, NullJournal, Snapshot, Step};
pub use table::{Record, RecordTable};
