mod client;
pub mod models;

pub use client::ScryfallClient;
pub use models::{CardIdentifier, CollectionResult, PrintsPage, RelatedCard, ScryfallCard};
