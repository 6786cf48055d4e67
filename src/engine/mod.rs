//! The trigger pipeline: event matching, parameter binding, queue draining,
//! and interactive test runs.

pub mod binder;
pub mod matcher;
pub mod processor;
pub mod test_runner;
