pub mod admin;
pub mod attendance;
pub mod auth;
pub mod core;
pub mod exports;
pub mod submissions;
