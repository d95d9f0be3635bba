//! Serving endpoint
//!
//! One HTTP surface for both local image-pull clients and sibling
//! nodes: authenticated range reads over `/blobs/...`, plus the
//! ambient `/metrics` and `/healthz` routes. Stateless per request.

pub mod endpoint;
pub mod error;
pub mod metrics;

pub use endpoint::{BlobServer, ServeConfig};
pub use error::{Result, ServerError};
