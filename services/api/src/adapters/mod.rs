pub mod db;
pub mod email;
pub mod in_app;
pub mod messaging;

pub use db::{PgNotificationStore, PgSessionStore, PgSlotStore};
pub use email::EmailChannel;
pub use in_app::{InAppChannel, InAppMessage};
pub use messaging::MessagingChannel;
