pub mod database;
pub mod inline;
