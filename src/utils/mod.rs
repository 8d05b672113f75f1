pub mod config;
pub mod ha;
pub mod time;
