pub mod engine;
pub mod runner;
pub mod state;
pub mod tracker;
