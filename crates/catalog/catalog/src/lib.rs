pub mod error;
pub mod store;
pub mod testing;

pub use error::CatalogError;
pub use store::{ArtifactCatalog, Page, newest_first, validate_for_create};
