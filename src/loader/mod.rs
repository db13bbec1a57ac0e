pub mod collection;
pub mod collection_loader;
pub mod error;
pub mod params;
pub mod pool;
pub mod source;

pub use collection::{BucketState, Collection, CollectionEvent, LoadKind};
pub use collection_loader::{CollectionLoader, LoaderConfig};
pub use error::LoaderError;
pub use params::{Limit, QueryParams};
pub use pool::Pool;
pub use source::{CollectionSource, FnSource, Indexed};
