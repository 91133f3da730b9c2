// Infrastructure adapters: concrete implementations of the app ports

pub mod compositor;
pub mod history_db;
pub mod http_client;
pub mod instagram_client;
pub mod memory_history;
pub mod reddit_client;

pub use compositor::VerticalStitcher;
pub use history_db::HistoryDb;
pub use http_client::{build_client, build_media_client, ReqwestFetcher};
pub use instagram_client::InstagramClient;
pub use memory_history::InMemoryHistory;
pub use reddit_client::RedditClient;
