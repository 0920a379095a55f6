//! Store Gateway implementations (§4.3).

mod postgres;

pub use postgres::PgStore;
