mod client;
mod models;

pub use client::Database;
pub use models::{DbCard, DbImage, ImageSource};
