//! API Module
//!
//! Admin HTTP handlers and routing for the cache service.
//!
//! # Endpoints
//! - `GET /health` - Health check, names the active engine
//! - `GET /stats` - Cache counters and hit rate
//! - `POST /invalidate_all` - Delete every cached record
//! - `POST /clean_expired` - Run the retention sweep now

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
