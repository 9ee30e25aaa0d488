//! Blob storage access and artifact naming.

mod artifacts;
mod layout;
mod store;

pub use artifacts::ArtifactStore;
pub use layout::DocLayout;
pub use store::{create_container_store, parse_s3_uri};
