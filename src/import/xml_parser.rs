// # MPC Order XML
//
// Reads the order export written by MPC Autofill:
//
//   <order>
//     <details>...</details>
//     <fronts><card><id/><slots/><name/><query/></card>...</fronts>
//     <backs><card><id/><slots/>...</card>...</backs>
//     <cardback>ID</cardback>
//   </order>
//
// Fronts become MPC intents. A front links to a back only through shared slots;
// the single global <cardback> is returned separately and never linked.

use crate::import::types::{ImportIntent, IntentSource};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

static DUPLICATE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\(\d+\)$").unwrap());

#[derive(Error, Debug)]
pub enum XmlImportError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Not an MPC order document (missing <order> root)")]
    MissingOrder,
}

/// Parsed order document
#[derive(Debug, Clone, PartialEq)]
pub struct XmlOrder {
    pub intents: Vec<ImportIntent>,
    /// Global card back; left to the caller's default-back handling
    pub global_back: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    None,
    Fronts,
    Backs,
}

#[derive(Debug, Default)]
struct OrderCard {
    id: String,
    slots: Vec<usize>,
    name: String,
    query: String,
}

/// Parse an MPC order document into intents
pub fn parse_order_xml(xml: &str) -> Result<XmlOrder, XmlImportError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut saw_order = false;
    let mut section = Section::None;
    let mut current: Option<OrderCard> = None;
    let mut field: Option<String> = None;
    let mut fronts: Vec<OrderCard> = Vec::new();
    let mut backs: Vec<OrderCard> = Vec::new();
    let mut global_back: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let tag = String::from_utf8_lossy(start.name().as_ref()).to_lowercase();
                match tag.as_str() {
                    "order" => saw_order = true,
                    "fronts" => section = Section::Fronts,
                    "backs" => section = Section::Backs,
                    "card" if section != Section::None => current = Some(OrderCard::default()),
                    _ => field = Some(tag),
                }
            }
            Event::Text(text) => {
                let value = text.unescape()?.trim().to_string();
                apply_text(&mut current, field.as_deref(), &value, &mut global_back);
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(&data.into_inner()).trim().to_string();
                apply_text(&mut current, field.as_deref(), &value, &mut global_back);
            }
            Event::End(end) => {
                let tag = String::from_utf8_lossy(end.name().as_ref()).to_lowercase();
                match tag.as_str() {
                    "fronts" | "backs" => section = Section::None,
                    "card" => {
                        if let Some(card) = current.take() {
                            if card.id.is_empty() {
                                warn!("Skipping order card without an id");
                            } else if section == Section::Fronts {
                                fronts.push(card);
                            } else if section == Section::Backs {
                                backs.push(card);
                            }
                        }
                    }
                    _ => field = None,
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_order {
        return Err(XmlImportError::MissingOrder);
    }

    let mut back_by_slot: HashMap<usize, String> = HashMap::new();
    for back in &backs {
        for slot in &back.slots {
            back_by_slot.insert(*slot, back.id.clone());
        }
    }

    let mut intents = Vec::new();
    for front in &fronts {
        let name = display_name(front);

        // One intent per distinct back among this front's slots
        let mut groups: Vec<(Option<String>, u32)> = Vec::new();
        for slot in &front.slots {
            let back = back_by_slot.get(slot).cloned();
            match groups.iter_mut().find(|(id, _)| *id == back) {
                Some((_, count)) => *count += 1,
                None => groups.push((back, 1)),
            }
        }
        if groups.is_empty() {
            groups.push((None, 1));
        }

        for (back, quantity) in groups {
            let source = IntentSource::Mpc {
                mpc_id: front.id.clone(),
                is_token: false,
            };
            match ImportIntent::new(&name, quantity, source) {
                Ok(intent) => intents.push(match back {
                    Some(back_id) => intent.with_back(back_id),
                    None => intent,
                }),
                Err(e) => warn!("Skipping order card {}: {}", front.id, e),
            }
        }
    }

    debug!(
        "Parsed order XML: {} front(s), {} back(s), {} intent(s), global back: {:?}",
        fronts.len(),
        backs.len(),
        intents.len(),
        global_back
    );

    Ok(XmlOrder {
        intents,
        global_back,
    })
}

fn apply_text(
    current: &mut Option<OrderCard>,
    field: Option<&str>,
    value: &str,
    global_back: &mut Option<String>,
) {
    match (current.as_mut(), field) {
        (Some(card), Some("id")) => card.id = value.to_string(),
        (Some(card), Some("slots")) => card.slots = parse_slots(value),
        (Some(card), Some("name")) => card.name = value.to_string(),
        (Some(card), Some("query")) => card.query = value.to_string(),
        (None, Some("cardback")) if !value.is_empty() => *global_back = Some(value.to_string()),
        _ => {}
    }
}

/// Parse a comma separated slot list, ignoring entries that are not numbers
fn parse_slots(value: &str) -> Vec<usize> {
    value
        .split(',')
        .filter_map(|slot| slot.trim().parse::<usize>().ok())
        .collect()
}

/// Card name from the image file name, falling back to the search query
fn display_name(card: &OrderCard) -> String {
    let file_name = card.name.trim();
    let stem = match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    };
    let stem = DUPLICATE_SUFFIX.replace(stem, "").trim().to_string();

    if stem.is_empty() {
        card.query.trim().to_string()
    } else {
        stem
    }
}
