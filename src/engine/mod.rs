pub mod lifecycle;
pub mod pricing;
pub mod rate_limiter;
pub mod service;
