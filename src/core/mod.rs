// Core modules: errors, schemas, rows, table references, view resolution, policy.
pub mod config;
pub mod error;
pub mod row;
pub mod schema;
pub mod table_ref;
pub mod view;
