//! §4.6 Catalogue Service and its §4.6.1 repository boundary.

pub mod repository;
pub mod service;

pub use repository::{CatalogueRepository, InMemoryCatalogueRepository};
pub use service::{CatalogueEntryPatch, CatalogueService, NewCatalogueEntry};
