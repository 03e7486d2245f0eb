pub mod sync_processor;
pub mod telegram_sync_handler;

pub use sync_processor::*;
pub use telegram_sync_handler::*;
