//! Tool descriptor persistence and lexical search.

pub mod descriptor;
pub mod error;
pub mod index;
pub mod loader;
pub mod search;
pub mod store;

pub use descriptor::ToolDescriptor;
pub use error::IndexError;
pub use index::ToolIndex;
pub use loader::{load_descriptor_root, load_server_dir};
pub use store::DescriptorStore;
