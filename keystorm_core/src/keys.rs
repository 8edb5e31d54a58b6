//! Translation of symbolic key sequences into the raw bytes a terminal emits.
//!
//! Literal characters pass through UTF-8 encoded. A `<NAME>` token is looked
//! up in [`SPECIAL_KEYS`]; `<C-x>` becomes the control byte for `x`. Tokens
//! that match neither are dropped without error and reported through
//! [`Encoded::unknown_tokens`] so callers can decide how strict to be.

/// Named keys and the byte sequences a VT100-compatible terminal sends for them.
pub const SPECIAL_KEYS: &[(&str, &[u8])] = &[
    ("CR", b"\r"),
    ("NL", b"\n"),
    ("ESC", b"\x1b"),
    ("BS", b"\x08"),
    ("Tab", b"\t"),
    ("Space", b" "),
    ("Up", b"\x1b[A"),
    ("Down", b"\x1b[B"),
    ("Right", b"\x1b[C"),
    ("Left", b"\x1b[D"),
    ("Home", b"\x1bOH"),
    ("End", b"\x1bOF"),
    ("PageUp", b"\x1b[5~"),
    ("PageDown", b"\x1b[6~"),
    ("Delete", b"\x1b[3~"),
];

const CONTROL_MASK: u8 = 0x1f;

/// Result of encoding a sequence: the bytes plus any `<...>` tokens that were
/// not recognised and therefore contributed nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub unknown_tokens: Vec<String>,
}

/// Encodes `keys` into raw terminal bytes, silently dropping unknown tokens.
pub fn encode(keys: &str) -> Vec<u8> {
    encode_with_report(keys).bytes
}

/// Encodes `keys` and records which `<...>` tokens were dropped.
pub fn encode_with_report(keys: &str) -> Encoded {
    let mut out = Encoded::default();
    let mut i = 0;

    while i < keys.len() {
        let rest = &keys[i..];
        let Some(ch) = rest.chars().next() else {
            break;
        };

        if ch == '<' && rest.len() > 1 {
            if let Some(close) = rest.find('>') {
                let token = &rest[1..close];
                match special_key_bytes(token) {
                    Some(bytes) => out.bytes.extend_from_slice(&bytes),
                    None => out.unknown_tokens.push(token.to_string()),
                }
                i += close + 1;
                continue;
            }
        }

        let mut buf = [0u8; 4];
        out.bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        i += ch.len_utf8();
    }

    out
}

/// Looks up a single token name (without the angle brackets).
pub fn special_key_bytes(token: &str) -> Option<Vec<u8>> {
    if let Some(rest) = token.strip_prefix("C-") {
        return control_byte(rest).map(|b| vec![b]);
    }
    SPECIAL_KEYS
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, bytes)| bytes.to_vec())
}

fn control_byte(rest: &str) -> Option<u8> {
    let mut chars = rest.chars();
    let c = chars.next()?;
    if chars.next().is_some() || !c.is_ascii() {
        return None;
    }
    match c {
        'a'..='z' => Some(c as u8 - 96),
        'A'..='Z' | '@' | '[' | '\\' | ']' | '^' | '_' => Some(c as u8 & CONTROL_MASK),
        '?' => Some(0x7f),
        _ => None,
    }
}
