//! Test support.
//!
//! [`FakeLedger`] and [`FakeRunner`] let orchestrator runs be tested without
//! PostgreSQL or `psql`. [`TestDatabase`] gives tests a real server when
//! `TEST_DATABASE_URL` is set.

mod db;
mod mock;

pub use db::{IsolatedTestDb, TestDatabase};
pub use mock::{FakeLedger, FakeRunner};
