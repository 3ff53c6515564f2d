// # Import Module
//
// Card-list import with focused, testable components:
//
// - **Parsers**: decklist text, MPC order XML and deck-builder URLs -> `ImportIntent`s
// - **Resolver**: coalesced, chunked and paced provider lookups
// - **ImportOrchestrator**: generation-tracked runs, cancellation, locked commits
// - **TokenPostProcessor**: silent follow-up import of created tokens
//
// Public API:
// - `ImportOrchestrator`: Start, cancel and await import runs
// - `ImportRun`: Handle to one run (generation, cancel, outcome)
// - `ImportProgress`: Lifecycle events for subscribers

pub mod deck_url_parser;
pub mod decklist_parser;
mod handle;
mod progress;
pub mod resolver;
mod service;
pub mod text;
mod token_processor;
pub mod types;
pub mod xml_parser;

// Public API exports
pub use deck_url_parser::{detect_provider, DeckProvider, DeckUrlError, DeckUrlImporter};
pub use decklist_parser::{format_decklist, format_intent, parse_decklist, parse_line};
pub use handle::{
    Generation, ImportError, ImportOutcome, ImportRun, ImportSummary, OnComplete, ProcessOptions,
};
pub use progress::{ImportProgress, ImportProgressHandle};
pub use resolver::{
    ArtSource, CardCatalog, ProviderError, ResolutionReport, ResolvedCard, ResolvedImage,
    Resolver, Unresolved,
};
pub use service::{ImportOrchestrator, ImportState, NO_VALID_CARDS};
pub use text::{decode_text, sniff_input, InputKind};
pub use token_processor::TokenPostProcessor;
pub use types::{
    dedupe_intents, CardOverrides, ImportIntent, IntentError, IntentSource, SetCode,
    SourcePreference,
};
pub use xml_parser::{parse_order_xml, XmlImportError, XmlOrder};
