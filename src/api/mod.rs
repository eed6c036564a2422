//! HTTP API for the investigation service.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check (no auth)
//! - `GET /` - List investigations (`page`, `limit`, `status`, `agent_id`, `with_episodes`)
//! - `GET /?investigation_id=<id>` - Investigation details
//! - `GET /?inference_id=<uuid>` - Inference details
//! - `POST /` - Create and drive an investigation to completion
//! - `GET /investigation/{id}` - Investigation details
//! - `GET /inference/{id}` - Inference details
//! - `GET /pending/{investigation_id}/wait` - Wait for the agent's results
//! - `OPTIONS *` - CORS preflight, always 200
//!
//! Every route except `/health` and `OPTIONS` requires `Authorization: Bearer <token>`.

mod auth;
mod error;
mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
