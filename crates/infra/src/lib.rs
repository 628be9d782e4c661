//! Infrastructure layer: event storage, command dispatch, read models and
//! the open-item reservation index.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod reservations;

#[cfg(test)]
mod integration_tests;
