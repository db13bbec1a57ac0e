pub mod listing;
pub mod server;

pub use listing::*;
pub use server::*;
