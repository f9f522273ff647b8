pub mod file;
pub mod postgres;
pub mod traits;

pub use file::FileStore;
pub use postgres::PostgresStore;
pub use traits::{EntityStore, StoreError, StoreResult};
