//! Cart store adapters

pub mod memory;
pub mod postgres;

pub use memory::MemoryCartStore;
pub use postgres::PgCartStore;
