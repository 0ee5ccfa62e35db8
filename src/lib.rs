pub mod amas;
pub mod compute;
pub mod config;
pub mod logging;
