//! Shared names and defaults used across the harvester, profile sync and repost flows.

// Candidate filter
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

// Characters kept by `sanitize_title`, besides ASCII letters and digits
pub const TITLE_EXTRA_CHARS: &str = "-_.() ";

// Leaves room for the timestamp and extension under the 255-byte name limit
pub const MAX_TITLE_BYTES: usize = 200;

// Harvest defaults
pub const DEFAULT_MAX_ITEMS: usize = 1000;
pub const DEFAULT_WORKERS: usize = 30;
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

// Profile sync
pub const CAPTION_FILE: &str = "caption.txt";
pub const COMPOSITE_FILE: &str = "combined_images.jpg";
pub const POST_FOLDER_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

// Filenames produced by the harvester carry the post's UTC creation time
pub const HARVEST_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// Files and folders
pub const DEFAULT_CONFIG_FILE: &str = "harvester.toml";
pub const DEFAULT_DATABASE_PATH: &str = "data/history.db";
pub const DEFAULT_IMAGES_ROOT: &str = "images";
pub const LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "harvester.log";
pub const DEFAULT_LOG_FILTER: &str = "info,media_harvester=info";

// Environment variables
pub const ENV_CONFIG_PATH: &str = "HARVEST_CONFIG";
pub const ENV_METRICS_PORT: &str = "HARVEST_METRICS_PORT";

// Sent by the profile-sync and media clients; Reddit calls use REDDIT_USER_AGENT
pub const DEFAULT_USER_AGENT: &str = concat!("media_harvester/", env!("CARGO_PKG_VERSION"));
