use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use tracing::{debug, warn};

/// Decode an uploaded decklist or order file of unknown encoding.
///
/// A byte order mark wins; otherwise the encoding is guessed from the content.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        if had_errors {
            warn!("Replaced invalid {} sequences while decoding", encoding.name());
        }
        return text.into_owned();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    debug!("Detected text encoding: {}", encoding.name());

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!("Replaced invalid {} sequences while decoding", encoding.name());
    }
    text.into_owned()
}

/// What kind of import a piece of input looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    DeckUrl,
    OrderXml,
    Decklist,
}

/// Guess the input kind from its content
pub fn sniff_input(text: &str) -> InputKind {
    let trimmed = text.trim_start();
    let is_url = trimmed.starts_with("http://") || trimmed.starts_with("https://");
    if is_url && !trimmed.trim_end().contains(char::is_whitespace) {
        return InputKind::DeckUrl;
    }
    if trimmed.starts_with("<?xml") || trimmed.starts_with("<order") {
        return InputKind::OrderXml;
    }
    InputKind::Decklist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_with_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("1 Lim-Dûl's Vault".as_bytes());
        assert_eq!(decode_text(&bytes), "1 Lim-Dûl's Vault");
    }

    #[test]
    fn test_decode_legacy_single_byte_text() {
        // Not valid UTF-8; must still decode without replacement characters
        let bytes = b"1 Lim-D\xfbl's Vault\n1 J\xf6tun Grunt\n";
        let text = decode_text(bytes);
        assert!(text.starts_with("1 Lim-D"));
        assert!(text.contains("tun Grunt"));
        assert!(!text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_sniff_input() {
        assert_eq!(
            sniff_input("https://archidekt.com/decks/1/x\n"),
            InputKind::DeckUrl
        );
        assert_eq!(sniff_input("<?xml version=\"1.0\"?><order/>"), InputKind::OrderXml);
        assert_eq!(sniff_input("4 Sol Ring"), InputKind::Decklist);
    }
}
