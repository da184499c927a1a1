pub mod dispatch;
pub mod domain;
pub mod memory;
pub mod ports;
pub mod reminder;
pub mod scheduler;

pub use domain::{
    ChannelKind, DeliveryStatus, Reminder, ReminderStage, Requester, Role, Session, SessionStatus,
    Slot, SlotState, TherapyType,
};
pub use ports::{
    Clock, CoreError, CoreResult, DeliveryChannel, DeliveryError, NotificationStore, SessionStore,
    SlotStore, SystemClock,
};
