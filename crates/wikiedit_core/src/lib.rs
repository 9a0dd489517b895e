pub mod config;
pub mod error;
pub mod gateway;
pub mod pages;
pub mod registry;
pub mod server;
