pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod machines;
pub mod results;
pub mod routes;
pub mod services;
pub mod state;

#[cfg(test)]
pub mod test_support;
