//! Dispatch core for shared test environments.
//!
//! Pure domain logic with no database access: the run-request state
//! machine, busy-environment backoff policy, subprocess execution, and the
//! [`dispatcher::Dispatcher`] that ties them together through the
//! collaborator traits in [`store`].

pub mod backoff;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod outcome;
pub mod process;
pub mod run;
pub mod run_status;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_helpers;
