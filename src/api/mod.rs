pub mod handlers;
pub mod routes;
pub mod token;
pub mod ws;

pub use handlers::AppState;
pub use routes::create_router;
