//! 连接事件定义
//!
//! 客户端通过长连接发送 `ClientEvent`，服务端推送 `ServerEvent`。
//! 线上格式统一为 `{"event": "<名称>", "data": {...}}`。

pub mod client_event;
pub mod server_event;

// 重新导出事件类型
pub use client_event::*;
pub use server_event::*;
