/// Telegram message handlers feeding the image uploader
pub mod handlers;
/// Outbound replies for forwarded messages
pub mod sink;

pub use handlers::{get_user_id_safe, handle_message, message_events, session_from_message};
pub use sink::TelegramSink;
