//! Database migration system (§3.1).
//!
//! Provides the built-in garm schema migration and support for running
//! additional, operator-supplied migrations from a directory.

mod builtin;
mod runner;

pub use builtin::get_builtin_migrations;
pub use runner::{load_migrations_from_dir, Migration, MigrationRunner};
