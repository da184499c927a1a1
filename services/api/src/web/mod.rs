pub mod reminder_task;
pub mod rest;
pub mod state;

// Re-export the pieces the server binary wires together.
pub use reminder_task::{spawn_reminder_task, SweepHandle};
pub use rest::ApiDoc;
pub use state::AppState;
