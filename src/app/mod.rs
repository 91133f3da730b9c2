pub mod ports;
pub mod profile_sync_use_case;
pub mod repost_use_case;

pub use profile_sync_use_case::{ProfileSyncSettings, ProfileSyncUseCase};
pub use repost_use_case::{RepostSettings, RepostUseCase};
