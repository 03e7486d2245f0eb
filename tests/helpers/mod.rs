#![allow(dead_code, unused_imports)]
pub mod clock;
pub mod handlers;
pub mod telegram;
pub mod test_db;

pub use clock::*;
pub use handlers::*;
pub use telegram::*;
pub use test_db::*;
