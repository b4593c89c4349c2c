//! 领域实体定义

pub mod direct_message;
pub mod message;

pub use direct_message::*;
pub use message::*;
