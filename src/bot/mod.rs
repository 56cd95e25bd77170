/// Telegram delivery channel
pub mod channel;
/// Command and message handlers
pub mod handlers;
/// Text message helpers with retry
pub mod resilient;

pub use channel::TelegramChannel;
pub use handlers::{Admins, Command};
