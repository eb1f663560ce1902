//! Output writers: flat CSV tables.
pub mod table;
