mod chat_session;
mod message_history;
mod room_presence;


pub use chat_session::ChatSessionHandler;
pub use message_history::{HistoryQuery, MessageHistoryService, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use room_presence::RoomPresenceHandler;
