// # Decklist Parser
//
// Line-oriented decklist grammar:
//
//   [N | Nx] [t:]<card name> [trailing tags...]
//
// Trailing tags are stripped from the end of the line one at a time until none
// remain. Recognized tags set identity hints; anything else that looks like a tag
// is dropped. Text that matches no tag pattern stays part of the name.

use crate::import::types::{ImportIntent, IntentSource, SetCode};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, trace};

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*[xX]?\s+").unwrap());
static TOKEN_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^t:\s*").unwrap());
static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(deck|main ?deck|mainboard|commander|companion|sideboard|maybeboard|considering|tokens?)\s*:?$")
        .unwrap()
});

static MPC_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\[mpc:\s*([^\]\s]+)\s*\]$").unwrap());
static BRACKET_SET_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\[([A-Za-z0-9]{2,6})\]\s*\{([^}\s]+)\}$").unwrap());
static PAREN_SET_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\(([A-Za-z0-9]{2,6})\)\s+([^\s\[\]{}()^*]+)$").unwrap()
});
static PAREN_SET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\(([A-Za-z0-9]{2,6})\)$").unwrap());
static KEY_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(set|s|num|cn):(\S+)$").unwrap());
static BRACKET_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\[[^\]]*\]$").unwrap());
static CARET_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\^[^^]*\^$").unwrap());
static FOIL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\*[A-Za-z]{1,8}\*$").unwrap());

/// Identity hints collected while stripping tags
#[derive(Debug, Default, Clone, PartialEq)]
struct TrailingTags {
    set: Option<SetCode>,
    number: Option<String>,
    mpc_id: Option<String>,
}

/// Parse a whole decklist into intents.
///
/// Accepts LF, CRLF and CR line endings. Blank lines, `//` and `#` comments and
/// section headers produce no intent. Lines under a sideboard/maybeboard header are
/// tagged with that category, lines under a tokens header become tokens.
pub fn parse_decklist(text: &str) -> Vec<ImportIntent> {
    let mut intents = Vec::new();
    let mut category: Option<String> = None;
    let mut in_tokens = false;

    for raw_line in text.split(['\n', '\r']) {
        let line = raw_line.trim();

        if let Some(header) = SECTION_HEADER.captures(line) {
            let header = header[1].to_lowercase();
            in_tokens = header.starts_with("token");
            category = match header.as_str() {
                "deck" | "main deck" | "maindeck" | "mainboard" | "commander" | "companion" => None,
                _ if in_tokens => None,
                other => Some(capitalize(other)),
            };
            trace!("Decklist section '{}'", header);
            continue;
        }

        let Some(mut intent) = parse_line(line) else {
            continue;
        };

        if in_tokens {
            intent.source = match intent.source {
                IntentSource::CatalogLookup { set, number } => IntentSource::Token {
                    set,
                    number,
                    catalog_id: None,
                },
                IntentSource::Mpc { mpc_id, .. } => IntentSource::Mpc {
                    mpc_id,
                    is_token: true,
                },
                other => other,
            };
        }
        if intent.category.is_none() {
            intent.category = category.clone();
        }
        intents.push(intent);
    }

    debug!("Parsed {} intent(s) from decklist", intents.len());
    intents
}

/// Parse one decklist line. Returns `None` for lines that carry no card.
pub fn parse_line(line: &str) -> Option<ImportIntent> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
        return None;
    }

    let (quantity, rest) = match QUANTITY.captures(line) {
        Some(caps) => {
            let quantity = caps[1].parse::<u32>().unwrap_or(1).max(1);
            (quantity, &line[caps.get(0).map_or(0, |m| m.end())..])
        }
        None => (1, line),
    };

    let mut rest = rest.trim();
    let mut is_token = false;
    if let Some(prefix) = TOKEN_PREFIX.find(rest) {
        is_token = true;
        rest = &rest[prefix.end()..];
    }

    let mut tags = TrailingTags::default();
    let name = strip_trailing_tags(rest, &mut tags);
    if name.is_empty() {
        trace!("Skipping line without a card name: {:?}", line);
        return None;
    }

    let source = match (tags.mpc_id, is_token) {
        (Some(mpc_id), is_token) => IntentSource::Mpc { mpc_id, is_token },
        (None, true) => IntentSource::Token {
            set: tags.set,
            number: tags.number,
            catalog_id: None,
        },
        (None, false) => IntentSource::CatalogLookup {
            set: tags.set,
            number: tags.number,
        },
    };

    ImportIntent::new(&name, quantity, source).ok()
}

/// Strip recognized tags from the end of `text`, recording their hints.
///
/// Tags are removed right to left, so when a hint appears twice the leftmost
/// occurrence is the one that sticks.
fn strip_trailing_tags(text: &str, tags: &mut TrailingTags) -> String {
    let mut rest = text.trim_end().to_string();

    loop {
        let before = rest.len();

        if let Some(caps) = MPC_TAG.captures(&rest) {
            tags.mpc_id = Some(caps[1].to_string());
        } else if let Some(caps) = BRACKET_SET_NUMBER.captures(&rest) {
            tags.set = Some(SetCode::new(&caps[1]));
            tags.number = Some(caps[2].to_string());
        } else if let Some(caps) = PAREN_SET_NUMBER.captures(&rest) {
            tags.set = Some(SetCode::new(&caps[1]));
            tags.number = Some(caps[2].to_string());
        } else if let Some(caps) = PAREN_SET.captures(&rest) {
            tags.set = Some(SetCode::new(&caps[1]));
        } else if let Some(caps) = KEY_VALUE.captures(&rest) {
            match caps[1].to_lowercase().as_str() {
                "set" | "s" => tags.set = Some(SetCode::new(&caps[2])),
                _ => tags.number = Some(caps[2].to_string()),
            }
        } else if !(BRACKET_TAG.is_match(&rest)
            || CARET_TAG.is_match(&rest)
            || FOIL_MARKER.is_match(&rest))
        {
            break;
        }

        let cut = [
            &*MPC_TAG,
            &*BRACKET_SET_NUMBER,
            &*PAREN_SET_NUMBER,
            &*PAREN_SET,
            &*KEY_VALUE,
            &*BRACKET_TAG,
            &*CARET_TAG,
            &*FOIL_MARKER,
        ]
        .iter()
        .find_map(|pattern| pattern.find(&rest).map(|m| m.start()));

        match cut {
            Some(start) => rest.truncate(start),
            None => break,
        }
        rest = rest.trim_end().to_string();

        if rest.len() == before {
            break;
        }
    }

    rest.trim().to_string()
}

/// Render an intent as one decklist line that parses back to the same card.
pub fn format_intent(intent: &ImportIntent) -> String {
    let mut line = format!("{}x ", intent.quantity);
    if intent.is_token() {
        line.push_str("t:");
    }
    line.push_str(&intent.name);

    match &intent.source {
        IntentSource::Mpc { mpc_id, .. } => {
            line.push_str(&format!(" [mpc:{}]", mpc_id));
        }
        IntentSource::CatalogLookup { set, number } | IntentSource::Token { set, number, .. } => {
            match (set, number) {
                (Some(set), Some(number)) => {
                    line.push_str(&format!(" ({}) {}", set.as_str().to_uppercase(), number))
                }
                (Some(set), None) => line.push_str(&format!(" ({})", set.as_str().to_uppercase())),
                (None, Some(number)) => line.push_str(&format!(" cn:{}", number)),
                (None, None) => {}
            }
        }
        IntentSource::Manual { .. } => {}
    }

    line
}

/// Render intents as a decklist, one line each
pub fn format_decklist(intents: &[ImportIntent]) -> String {
    intents
        .iter()
        .map(format_intent)
        .collect::<Vec<_>>()
        .join("\n")
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
