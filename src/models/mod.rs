pub mod money;
pub mod request;
