pub mod api;
pub mod database;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;
