pub mod models;
pub mod pages;
pub mod session;
pub mod settings;
pub mod statistics;
pub mod stopwatch;
pub mod trace;
