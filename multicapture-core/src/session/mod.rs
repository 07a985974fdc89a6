pub mod callback;
pub mod controller;
pub mod engine;
pub mod health;
pub mod registry;

#[cfg(test)]
pub(crate) mod mock_backend;
