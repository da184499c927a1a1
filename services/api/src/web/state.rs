//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use care_scheduling_core::ports::{NotificationStore, SessionStore, SlotStore};
use care_scheduling_core::scheduler::Scheduler;

use crate::adapters::InAppChannel;
use crate::config::Config;
use crate::web::reminder_task::SweepHandle;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: Arc<Scheduler>,
    pub slots: Arc<dyn SlotStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub notifications: Arc<dyn NotificationStore>,
    /// Kept directly (not behind the channel trait) so the notifications
    /// endpoint can read a user's in-app inbox.
    pub in_app: Arc<InAppChannel>,
    /// Nudges the reminder sweep after session mutations.
    pub sweep: SweepHandle,
}
