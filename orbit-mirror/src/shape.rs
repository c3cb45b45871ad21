//! Shared CBOR-shape classification, used by both the Block Extractor's
//! identity scan (`§4.2`) and the Block Analyzer (`§4.6`). Decoding goes
//! through an untyped `Ipld` value first, rather than requiring every block
//! to match one strict schema up front.

use libipld::Ipld;

use crate::model::Source;

/// Decode CBOR bytes into an untyped `Ipld` value.
pub fn decode_ipld(bytes: &[u8]) -> anyhow::Result<Ipld> {
    Ok(serde_ipld_dagcbor::from_slice(bytes)?)
}

/// Look up a string key in an `Ipld::Map`. Returns `None` for any other shape.
pub fn map_get<'a>(ipld: &'a Ipld, key: &str) -> Option<&'a Ipld> {
    match ipld {
        Ipld::Map(map) => map.get(key),
        _ => None,
    }
}

fn has_key(ipld: &Ipld, key: &str) -> bool {
    map_get(ipld, key).is_some()
}

/// Classify a decoded block by its shape, per the rules in `§4.6`:
///
/// - has `accessController` → root candidate
/// - has `sig`, `key`, `identity`, `payload` (with `v=2`, `id`, `clock`) → log-entry
/// - has `type ∈ {"orbitdb-access-controller", "ipfs"}` → access-controller
/// - has `id` and `type` only → identity
/// - otherwise → unknown
pub fn classify(ipld: &Ipld) -> Source {
    if has_key(ipld, "accessController") {
        return Source::Root;
    }

    let looks_like_entry = has_key(ipld, "sig")
        && has_key(ipld, "key")
        && has_key(ipld, "identity")
        && has_key(ipld, "payload")
        && has_key(ipld, "clock")
        && matches!(map_get(ipld, "v"), Some(Ipld::Integer(2)));

    if looks_like_entry {
        return Source::LogEntry;
    }

    if let Some(Ipld::String(controller_type)) = map_get(ipld, "type") {
        if controller_type == "orbitdb-access-controller" || controller_type == "ipfs" {
            return Source::AccessController;
        }
    }

    if has_key(ipld, "id") && has_key(ipld, "type") {
        return Source::Identity;
    }

    Source::Unknown
}

/// Whether a decoded block looks like an identity block specifically
/// (`id` and `type`, nothing more structured). Used by the extractor's
/// full-store identity scan, which only cares about this one shape.
pub fn looks_like_identity(ipld: &Ipld) -> bool {
    classify(ipld) == Source::Identity
}

/// Pull the CID a root block's `accessController` field points at, stripping
/// an `"/ipfs/<cid>"` scheme prefix if present.
pub fn access_controller_cid(root: &Ipld) -> Option<libipld::Cid> {
    let value = map_get(root, "accessController")?;
    let raw = match value {
        Ipld::String(s) => s.as_str(),
        Ipld::Link(cid) => return Some(*cid),
        _ => return None,
    };
    let stripped = raw.strip_prefix("/ipfs/").unwrap_or(raw);
    libipld::Cid::try_from(stripped).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid_bridge::digest_raw;
    use libipld::Ipld;

    fn map_of(pairs: &[(&str, Ipld)]) -> Ipld {
        Ipld::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn classifies_identity() {
        let identity = map_of(&[
            ("id", Ipld::String("03abc".into())),
            ("type", Ipld::String("publickey".into())),
        ]);
        assert_eq!(classify(&identity), Source::Identity);
    }

    #[test]
    fn classifies_access_controller() {
        let ac = map_of(&[(
            "type",
            Ipld::String("orbitdb-access-controller".into()),
        )]);
        assert_eq!(classify(&ac), Source::AccessController);
    }

    #[test]
    fn access_controller_cid_strips_ipfs_prefix() {
        let inner = digest_raw(b"access controller bytes");
        let rendered = crate::cid_bridge::render_base32(&inner).unwrap();
        let root = map_of(&[(
            "accessController",
            Ipld::String(format!("/ipfs/{rendered}")),
        )]);
        let found = access_controller_cid(&root).unwrap();
        assert_eq!(found, inner);
    }

    #[test]
    fn classifies_root() {
        let inner = digest_raw(b"access controller bytes");
        let rendered = crate::cid_bridge::render_base32(&inner).unwrap();
        let root = map_of(&[
            ("accessController", Ipld::String(rendered)),
            ("name", Ipld::String("mydb".into())),
            ("type", Ipld::String("eventlog".into())),
        ]);
        assert_eq!(classify(&root), Source::Root);
    }
}
