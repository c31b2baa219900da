pub mod dispatch;
pub mod error;
pub mod tracking;
