pub mod backend;
pub mod file;
pub mod frame;
pub mod memory;

pub use backend::{StorageBackend, WriteReceipt};
pub use file::FileBackend;
pub use memory::MemoryBackend;
