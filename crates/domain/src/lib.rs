//! 自习室实时通信核心领域模型
//!
//! 包含房间消息、私信、表情回应等实体，以及连接上收发的事件类型。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
