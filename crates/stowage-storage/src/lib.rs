pub mod backend;
pub mod file;
pub mod pagination;
pub mod registry;
pub mod restore;
#[cfg(feature = "s3")]
pub mod s3;
pub mod uri;

pub use backend::{Backend, BackendConfig, BackendOptions, ObjectReader};
pub use registry::{BackendRegistry, backend_for_uri};
pub use uri::TargetUri;
