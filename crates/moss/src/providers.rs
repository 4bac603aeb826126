pub mod base;
pub mod configs;
pub mod factory;
pub mod openrouter;
pub mod utils;

#[cfg(test)]
pub mod mock;
