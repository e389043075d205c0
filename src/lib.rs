pub mod compare;
pub mod config;
pub mod diff;
pub mod env;
pub mod executor;
pub mod formatter;
pub mod query;
pub mod runner;

#[cfg(test)]
mod testing;
