#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod index;
pub mod loader;
pub mod query;
pub mod stats;

pub use config::Config;
pub use index::{Catalog, TextIndex};
pub use loader::{CollectionLoader, CollectionSource, QueryParams};
