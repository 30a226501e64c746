//! Tool catalog: namespaced tool names and the entries built from live
//! connections. The catalog itself is recomputed from the connection
//! registry on every read; see `ConnectionManager::get_all_tools`.

pub mod types;

pub use types::{CatalogEntry, NamespacedToolName, TOOL_NAME_SEPARATOR};
