pub mod db;
pub mod location;
pub mod memory;

pub use db::DbAdapter;
pub use location::ChannelLocationAdapter;
pub use memory::MemoryStore;
