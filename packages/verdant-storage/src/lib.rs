pub mod db;
pub mod models;
pub mod pg;
pub mod schema;
pub mod stores;

mod error;

pub use error::{Error, Result};
