//! Database models and repositories.

pub mod models;
pub mod repository;

pub use self::models::*;
pub use self::repository::*;
