pub mod auth;
pub mod board;
pub mod cirrus;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
