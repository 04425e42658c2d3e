mod error;
mod sample;
mod sqlite;

pub use error::PersistenceError;
pub use sample::Sample;
pub use sqlite::SampleStore;
