//! User permissions.

pub mod roles;

pub use roles::resolve_query_type;
