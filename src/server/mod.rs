//! HTTP and WebSocket server surface.

mod handler;
mod runner;
mod state;

pub use runner::{app, run_server};
pub use state::AppState;
