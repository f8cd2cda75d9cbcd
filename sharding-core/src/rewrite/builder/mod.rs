pub mod parameter;
pub mod sql;
