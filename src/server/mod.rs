//! The HTTP gateway.
//!
//! Built on `may_minihttp`; every inbound request runs the full pipeline:
//! media negotiation, route match against the compiled specs, typed
//! parameter decoding, schema validation, change-management policy,
//! envelope construction, authorization, dispatch over the fabric, response
//! validation and pagination link synthesis.

mod pagination;
mod parse;
mod response;
mod service;

pub use pagination::add_pagination_info;
pub use parse::{parse_request, ParsedRequest};
pub use service::{AppService, GatewayConfig};
