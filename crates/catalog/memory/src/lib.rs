mod store;

pub use store::MemoryArtifactCatalog;
