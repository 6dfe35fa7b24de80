pub mod envelope;
pub mod error;
pub mod memory;
pub mod postgres_store;
pub mod redb_store;
pub mod store;
pub mod uow;

pub use envelope::Envelope;
pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres_store::PostgresStore;
pub use redb_store::RedbStore;
pub use store::Store;
pub use uow::UnitOfWork;
