pub mod catalog;
pub mod normalize;
pub mod text_index;
pub mod trie;

pub use catalog::{Catalog, CatalogError, Leaf, LeafSpec};
pub use normalize::normalize;
pub use text_index::{Prioritized, TextIndex};
