//! Input discovery and loading

pub mod file_walker;
pub mod loader;

pub use file_walker::{FileWalker, FileWalkerError, InputKind, resolve_inputs};
pub use loader::{LoadedInputs, load};
