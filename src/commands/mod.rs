pub mod config;
pub mod fixture;
