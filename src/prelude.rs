pub use anyhow::{anyhow, Context, Result};
pub use log::{debug, info, trace, warn};
pub use once_cell::sync::Lazy;

use directories::ProjectDirs;

/// Default cache directory when the embedding application doesn't supply one
/// explicitly: `~/.cache/imgcache` (or platform equivalent).
pub static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("", "", env!("CARGO_PKG_NAME")));
