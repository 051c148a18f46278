pub mod fetches;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod shows;
pub mod ws;

pub use routes::create_router;
