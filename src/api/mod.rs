pub mod client;
pub mod fallback;
pub mod retry;
pub mod tokens;
pub mod types;

pub use client::DebridClient;
pub use fallback::{FallbackClient, FALLBACK_TOKEN};
pub use retry::RetryPolicy;
pub use tokens::{TokenManager, TokenStatus};
pub use types::{TorrentSummary, TrafficInfo, UnrestrictResponse, UserInfo};
