pub mod catalog;
pub mod filesystem;
pub mod naming;
pub mod resolver;

pub use catalog::{ReplaceOutcome, TorrentCatalog};
pub use filesystem::{DebridFs, RefreshInfo, RefreshStatus};
pub use resolver::LinkResolver;
