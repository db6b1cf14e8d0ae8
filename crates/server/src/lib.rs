pub mod auth;
pub mod codec;
pub mod gateway;
