// src/lib.rs

//! Zenit Package Manager
//!
//! Package manager for RPM-based distributions with its own dependency
//! resolver and transaction planner.
//!
//! # Architecture
//!
//! - Pool: immutable in-memory universe of repository and installed packages
//! - Resolver: backtracking search from a [`resolver::Job`] to a solution,
//!   or a list of problems explaining why none exists
//! - Transactions: solutions ordered into install and erase steps, executed
//!   through download, verification and installer collaborators
//! - State: installed packages and transaction history in SQLite

pub mod db;
mod error;
pub mod installer;
pub mod packages;
pub mod pool;
pub mod repository;
pub mod resolver;
pub mod session;
pub mod transaction;
pub mod version;

pub use error::{Error, Result};
