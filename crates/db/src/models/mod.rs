//! Row types for the PostgreSQL store, and their conversion into the domain
//! types defined in `roleshift-core`.

pub mod audit;
pub mod backup;
pub mod operation;
pub mod snapshot;
pub mod user;
