pub mod config;
pub mod display;
pub mod downstream;
pub mod monitor;
pub mod state;
pub mod upstream;
