//! Orders, the position record and its persistence.

pub mod order;
pub mod position;
pub mod store;

pub use order::{AccountType, OrderAck, OrderRequest, Side};
pub use position::{LegState, Position, Step};
pub use store::{MemoryStore, PositionStore, SqliteStore};
