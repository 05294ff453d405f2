pub mod api;
mod middleware;

pub use api::{ApiState, OwnerId, build_api_router as build_router};
pub use middleware::RequestContext;
