//! ggnet-store — content-addressable file storage on the local disk.

pub mod path;
pub mod store;

pub use path::{
    blake3_path_transform, cas_path_transform, identity_path_transform, transform_for, PathKey,
    PathTransform,
};
pub use store::{Store, StoreError, StoreOpts, DEFAULT_ROOT};
