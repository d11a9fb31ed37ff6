//! Shared filesystem utilities.

pub mod files;
pub mod paths;

pub use files::{write_atomic, write_file_with_dirs};
pub use paths::{copy_dir_recursive, ensure_dir, path_exists, remove_path, OwnedPath};
