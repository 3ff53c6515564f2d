use serde::{Deserialize, Serialize};

/// Image links of one card face
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageUris {
    pub png: Option<String>,
    pub large: Option<String>,
    pub normal: Option<String>,
}

impl ImageUris {
    /// Best available print-quality image
    pub fn best(&self) -> Option<&str> {
        self.png
            .as_deref()
            .or(self.large.as_deref())
            .or(self.normal.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardFace {
    pub name: String,
    #[serde(default)]
    pub image_uris: Option<ImageUris>,
}

/// Entry of a card's `all_parts` list (tokens, meld pieces, combo pieces)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedCard {
    pub id: String,
    pub component: String,
    pub name: String,
    #[serde(default)]
    pub type_line: Option<String>,
}

/// A card object from the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScryfallCard {
    pub id: String,
    pub name: String,
    pub set: String,
    pub collector_number: String,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub type_line: Option<String>,
    #[serde(default)]
    pub image_uris: Option<ImageUris>,
    #[serde(default)]
    pub card_faces: Option<Vec<CardFace>>,
    #[serde(default)]
    pub all_parts: Option<Vec<RelatedCard>>,
}

impl ScryfallCard {
    /// Front image; double-faced cards keep their images on the faces
    pub fn front_image_url(&self) -> Option<String> {
        if let Some(url) = self.image_uris.as_ref().and_then(ImageUris::best) {
            return Some(url.to_string());
        }
        self.face_image(0)
    }

    /// Back image of a double-faced card
    pub fn back_image_url(&self) -> Option<String> {
        if self.image_uris.is_some() {
            return None;
        }
        self.face_image(1)
    }

    fn face_image(&self, index: usize) -> Option<String> {
        self.card_faces
            .as_ref()?
            .get(index)?
            .image_uris
            .as_ref()?
            .best()
            .map(str::to_string)
    }

    pub fn is_token(&self) -> bool {
        self.layout.as_deref().is_some_and(|layout| layout.contains("token"))
            || self
                .type_line
                .as_deref()
                .is_some_and(|type_line| type_line.contains("Token"))
    }

    /// Tokens this card creates
    pub fn token_parts(&self) -> Vec<RelatedCard> {
        self.all_parts
            .iter()
            .flatten()
            .filter(|part| part.component == "token" && part.id != self.id)
            .cloned()
            .collect()
    }

    /// Whether `name` refers to this card, including either face of a split or
    /// double-faced card
    pub fn answers_to(&self, name: &str) -> bool {
        let name = name.trim();
        self.name.eq_ignore_ascii_case(name)
            || self
                .name
                .split(" // ")
                .any(|face| face.eq_ignore_ascii_case(name))
    }
}

/// One entry of a collection lookup request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum CardIdentifier {
    Id {
        id: String,
    },
    SetNumber {
        set: String,
        collector_number: String,
    },
    NameSet {
        name: String,
        set: String,
    },
    Name {
        name: String,
    },
}

impl CardIdentifier {
    /// Whether a returned card answers this identifier
    pub fn matches(&self, card: &ScryfallCard) -> bool {
        match self {
            CardIdentifier::Id { id } => card.id == *id,
            CardIdentifier::SetNumber {
                set,
                collector_number,
            } => card.set.eq_ignore_ascii_case(set) && card.collector_number == *collector_number,
            CardIdentifier::NameSet { name, set } => {
                card.set.eq_ignore_ascii_case(set) && card.answers_to(name)
            }
            CardIdentifier::Name { name } => card.answers_to(name),
        }
    }

    /// Stable text form used in coalescing keys
    pub fn cache_key(&self) -> String {
        match self {
            CardIdentifier::Id { id } => format!("id={}", id),
            CardIdentifier::SetNumber {
                set,
                collector_number,
            } => format!("set={}#{}", set, collector_number),
            CardIdentifier::NameSet { name, set } => {
                format!("name={}@{}", name.to_lowercase(), set)
            }
            CardIdentifier::Name { name } => format!("name={}", name.to_lowercase()),
        }
    }
}

/// Result of a collection lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionResult {
    pub found: Vec<ScryfallCard>,
    pub not_found: Vec<CardIdentifier>,
}

/// One page of a paginated search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintsPage {
    pub cards: Vec<ScryfallCard>,
    pub has_more: bool,
}
