//! Language-model seam for climatecore.
//!
//! The actuator only needs one operation: prompt in, text out. Everything
//! behind that — provider APIs, auth, model selection — lives here.

pub mod http;
pub mod provider;
