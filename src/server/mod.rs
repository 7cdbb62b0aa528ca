// Submodules
pub mod auth;
pub mod realtime;
pub mod routes;
pub mod runtime;
pub mod session;
pub mod state;
pub mod transfer;

// Public API (what main.rs imports)
pub use routes::create_router;
pub use state::AppState;
