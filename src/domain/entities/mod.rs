pub mod queue_stats;
pub mod retry_policy;
pub mod sync_task;
pub mod telegram_payload;

pub use queue_stats::*;
pub use retry_policy::*;
pub use sync_task::*;
pub use telegram_payload::*;
