pub mod curator;
pub mod emitter;
pub mod grouper;
pub mod inventory;
pub mod io;
pub mod log_pbar;
pub mod metadata;
pub mod similarity;
pub mod splitter;
pub mod union_find;

pub use curator::curator_config::CuratorConfig;
pub use curator::{run, RunReport};
