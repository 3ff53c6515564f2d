mod client;
pub mod models;

pub use client::MpcClient;
pub use models::{search_query, AltArtMatches};
