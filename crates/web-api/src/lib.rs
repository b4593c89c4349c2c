//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 实时连接和历史消息查询，将请求委托给应用层。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
pub use ws_connection::WebSocketConnection;
