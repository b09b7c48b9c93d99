//! NIP-19 reference strings: decode into structured pointers and back.
//!
//! Only the shapes a reader needs are recognized: `naddr`, `nevent`, `note`,
//! `npub` and `nprofile`. Secret-key entities are rejected.

use nostr_sdk::nips::nip01::Coordinate;
use nostr_sdk::nips::nip19::{
    FromBech32, Nip19, Nip19Coordinate, Nip19Event, Nip19Profile, ToBech32,
};
use nostr_sdk::{EventId, Kind, PublicKey, RelayUrl};
use thiserror::Error;
use tracing::debug;

/// Relay hints embedded when encoding. Keeps references short.
pub const MAX_RELAY_HINTS: usize = 2;

const URI_PREFIX: &str = "nostr:";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty reference")]
    Empty,
    #[error("not decodable: {0}")]
    Malformed(String),
    #[error("unsupported reference type: {0}")]
    Unsupported(&'static str),
    #[error("invalid key or id: {0}")]
    InvalidHex(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPointer {
    pub kind: u16,
    pub author: String,
    pub identifier: String,
    pub relays: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPointer {
    pub id: String,
    pub author: Option<String>,
    pub kind: Option<u16>,
    pub relays: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePointer {
    pub author: String,
    pub relays: Vec<String>,
}

/// A decoded reference. Keys and ids are lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pointer {
    Address(AddressPointer),
    Event(EventPointer),
    Id(String),
    Author(ProfilePointer),
}

impl Pointer {
    /// Bech32 prefix this pointer encodes to.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Pointer::Address(_) => "naddr",
            Pointer::Event(_) => "nevent",
            Pointer::Id(_) => "note",
            Pointer::Author(p) if p.relays.is_empty() => "npub",
            Pointer::Author(_) => "nprofile",
        }
    }

    /// Relay hints carried by the reference, if any.
    pub fn relays(&self) -> &[String] {
        match self {
            Pointer::Address(a) => &a.relays,
            Pointer::Event(e) => &e.relays,
            Pointer::Author(p) => &p.relays,
            Pointer::Id(_) => &[],
        }
    }
}

impl std::fmt::Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pointer::Address(a) => write!(
                f,
                "address kind={} author={} d={} relays={:?}",
                a.kind, a.author, a.identifier, a.relays
            ),
            Pointer::Event(e) => write!(
                f,
                "event id={} author={} relays={:?}",
                e.id,
                e.author.as_deref().unwrap_or("-"),
                e.relays
            ),
            Pointer::Id(id) => write!(f, "id {id}"),
            Pointer::Author(p) => write!(f, "author {} relays={:?}", p.author, p.relays),
        }
    }
}

/// Decode a NIP-19 reference, with or without the `nostr:` scheme.
pub fn decode(reference: &str) -> Result<Pointer, DecodeError> {
    let trimmed = reference.trim();
    let bech = trimmed.strip_prefix(URI_PREFIX).unwrap_or(trimmed);
    if bech.is_empty() {
        return Err(DecodeError::Empty);
    }

    let entity = Nip19::from_bech32(bech).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    match entity {
        Nip19::Coordinate(c) => Ok(Pointer::Address(AddressPointer {
            kind: c.coordinate.kind.as_u16(),
            author: c.coordinate.public_key.to_hex(),
            identifier: c.coordinate.identifier.clone(),
            relays: relay_strings(&c.relays),
        })),
        Nip19::Event(e) => Ok(Pointer::Event(EventPointer {
            id: e.event_id.to_hex(),
            author: e.author.map(|pk| pk.to_hex()),
            kind: e.kind.map(|k| k.as_u16()),
            relays: relay_strings(&e.relays),
        })),
        Nip19::EventId(id) => Ok(Pointer::Id(id.to_hex())),
        Nip19::Pubkey(pk) => Ok(Pointer::Author(ProfilePointer {
            author: pk.to_hex(),
            relays: Vec::new(),
        })),
        Nip19::Profile(p) => Ok(Pointer::Author(ProfilePointer {
            author: p.public_key.to_hex(),
            relays: relay_strings(&p.relays),
        })),
        _ => Err(DecodeError::Unsupported("secret key")),
    }
}

/// Encode a pointer. At most [`MAX_RELAY_HINTS`] relays are embedded, in order.
pub fn encode(pointer: &Pointer) -> Result<String, DecodeError> {
    let encoded = match pointer {
        Pointer::Address(a) => {
            let coordinate = Coordinate {
                kind: Kind::from(a.kind),
                public_key: parse_public_key(&a.author)?,
                identifier: a.identifier.clone(),
            };
            Nip19Coordinate {
                coordinate,
                relays: relay_hints(&a.relays),
            }
            .to_bech32()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?
        }
        Pointer::Event(e) => {
            let author = e.author.as_deref().map(parse_public_key).transpose()?;
            Nip19Event {
                event_id: parse_event_id(&e.id)?,
                author,
                kind: e.kind.map(Kind::from),
                relays: relay_hints(&e.relays),
            }
            .to_bech32()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?
        }
        Pointer::Id(id) => parse_event_id(id)?
            .to_bech32()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?,
        Pointer::Author(p) if p.relays.is_empty() => parse_public_key(&p.author)?
            .to_bech32()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?,
        Pointer::Author(p) => Nip19Profile {
            public_key: parse_public_key(&p.author)?,
            relays: relay_hints(&p.relays),
        }
        .to_bech32()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?,
    };
    Ok(encoded)
}

/// Hex pubkey for `npub`, `nprofile` or hex input.
///
/// Anything that cannot be decoded is returned as given; the caller decides
/// whether a non-hex key is usable.
pub fn normalize_author(key: &str) -> String {
    let trimmed = key.trim();
    let bare = trimmed.strip_prefix(URI_PREFIX).unwrap_or(trimmed);
    if bare.starts_with("npub1") || bare.starts_with("nprofile1") {
        match decode(bare) {
            Ok(Pointer::Author(p)) => return p.author,
            Ok(other) => debug!(kind = other.kind_name(), "author key decoded to non-author"),
            Err(e) => tracing::warn!("Invalid npub format {bare}: {e}"),
        }
    }
    bare.to_string()
}

/// True for a 64-character hex string (raw event id or pubkey).
pub fn is_hex_id(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_public_key(hex: &str) -> Result<PublicKey, DecodeError> {
    PublicKey::from_hex(hex).map_err(|_| DecodeError::InvalidHex(hex.to_string()))
}

fn parse_event_id(hex: &str) -> Result<EventId, DecodeError> {
    EventId::from_hex(hex).map_err(|_| DecodeError::InvalidHex(hex.to_string()))
}

fn relay_strings(relays: &[RelayUrl]) -> Vec<String> {
    relays.iter().map(|r| r.to_string()).collect()
}

fn relay_hints(relays: &[String]) -> Vec<RelayUrl> {
    relays
        .iter()
        .filter_map(|r| match RelayUrl::parse(r) {
            Ok(url) => Some(url),
            Err(e) => {
                debug!(relay = %r, "dropping unparsable relay hint: {e}");
                None
            }
        })
        .take(MAX_RELAY_HINTS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::Keys;

    const ID: &str = "b3e392b11f5d4f28321cedd09303a748acfd0487aea5a7450b3481c60b6e4f87";

    fn author() -> String {
        Keys::generate().public_key().to_hex()
    }

    fn relays(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("wss://relay{i}.example.com")).collect()
    }

    #[test]
    fn address_roundtrip() {
        let pointer = Pointer::Address(AddressPointer {
            kind: 30023,
            author: author(),
            identifier: "my-first-post".into(),
            relays: relays(2),
        });
        let encoded = encode(&pointer).unwrap();
        assert!(encoded.starts_with("naddr1"));
        assert_eq!(decode(&encoded).unwrap(), pointer);
        assert_eq!(encode(&decode(&encoded).unwrap()).unwrap(), encoded);
    }

    #[test]
    fn address_caps_relay_hints() {
        let pk = author();
        let pointer = Pointer::Address(AddressPointer {
            kind: 30023,
            author: pk.clone(),
            identifier: "x".into(),
            relays: relays(5),
        });
        let decoded = decode(&encode(&pointer).unwrap()).unwrap();
        assert_eq!(decoded.relays(), &relays(2)[..]);
    }

    #[test]
    fn encoding_is_stable() {
        let pointer = Pointer::Event(EventPointer {
            id: ID.into(),
            author: Some(author()),
            kind: None,
            relays: relays(1),
        });
        assert_eq!(encode(&pointer).unwrap(), encode(&pointer).unwrap());
    }

    #[test]
    fn event_roundtrip_with_and_without_author() {
        for author in [None, Some(author())] {
            let pointer = Pointer::Event(EventPointer {
                id: ID.into(),
                author,
                kind: None,
                relays: relays(2),
            });
            let encoded = encode(&pointer).unwrap();
            assert!(encoded.starts_with("nevent1"));
            assert_eq!(decode(&encoded).unwrap(), pointer);
        }
    }

    #[test]
    fn note_roundtrip() {
        let pointer = Pointer::Id(ID.into());
        let encoded = encode(&pointer).unwrap();
        assert!(encoded.starts_with("note1"));
        assert_eq!(decode(&encoded).unwrap(), pointer);
    }

    #[test]
    fn author_roundtrip_npub_and_nprofile() {
        let pk = author();
        let bare = Pointer::Author(ProfilePointer {
            author: pk.clone(),
            relays: vec![],
        });
        let npub = encode(&bare).unwrap();
        assert!(npub.starts_with("npub1"));
        assert_eq!(decode(&npub).unwrap(), bare);

        let hinted = Pointer::Author(ProfilePointer {
            author: pk,
            relays: relays(1),
        });
        let nprofile = encode(&hinted).unwrap();
        assert!(nprofile.starts_with("nprofile1"));
        assert_eq!(decode(&nprofile).unwrap(), hinted);
    }

    #[test]
    fn accepts_uri_scheme() {
        let note = encode(&Pointer::Id(ID.into())).unwrap();
        assert_eq!(
            decode(&format!("nostr:{note}")).unwrap(),
            Pointer::Id(ID.into())
        );
    }

    #[test]
    fn corrupted_checksum_is_not_decodable() {
        let mut note = encode(&Pointer::Id(ID.into())).unwrap();
        let last = note.pop().unwrap();
        note.push(if last == 'q' { 'p' } else { 'q' });
        assert!(matches!(decode(&note), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode("naddr1garbage"), Err(DecodeError::Malformed(_))));
        assert_eq!(decode("  "), Err(DecodeError::Empty));
    }

    #[test]
    fn secret_keys_are_rejected() {
        let nsec = Keys::generate().secret_key().to_bech32().unwrap();
        assert!(matches!(decode(&nsec), Err(DecodeError::Unsupported(_))));
    }

    #[test]
    fn encode_rejects_bad_hex() {
        let pointer = Pointer::Id("not-hex".into());
        assert!(matches!(encode(&pointer), Err(DecodeError::InvalidHex(_))));
    }

    #[test]
    fn normalize_author_handles_npub_and_hex() {
        let keys = Keys::generate();
        let hex = keys.public_key().to_hex();
        let npub = keys.public_key().to_bech32().unwrap();
        assert_eq!(normalize_author(&npub), hex);
        assert_eq!(normalize_author(&hex), hex);
        assert_eq!(normalize_author("npub1broken"), "npub1broken");
    }

    #[test]
    fn hex_id_detection() {
        assert!(is_hex_id(ID));
        assert!(!is_hex_id("abc"));
        assert!(!is_hex_id(&"z".repeat(64)));
    }
}
