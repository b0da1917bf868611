mod clean;
mod core;
mod utils;

pub use clean::clean;
pub use core::{build_project, failure_count};
pub use utils::{CONFIG_FILE, collect_sources, load_config, object_path};
