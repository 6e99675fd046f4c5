pub mod memory;
pub mod table;

pub use chatcore::store::{error, traits};
pub use memory::MemoryStore;
