//! Deterministic, reversible reinterpretation between the remote store's
//! raw-binary multihash CIDs and the log DB's CBOR-codec multihash CIDs.
//!
//! See `§4.1`. The bridge never hashes or re-encodes anything: a block
//! pair `{raw, cbor}` produced by the bridge always shares the same
//! multihash, and the only differing field is the codec code.
//! Base-encoding (which multibase string a `Cid` renders to) is kept as a
//! parameter to the rendering functions here, never baked into the `Cid`
//! value itself.

use libipld::{
    cid::multibase::Base,
    multihash::Code,
    Cid, IpldCodec,
};
use tracing::trace;

use crate::error::{Error, Result};

/// The multicodec code for raw binary blocks, as used by the remote store.
pub const CODEC_RAW: u64 = 0x55;
/// The multicodec code for DAG-CBOR blocks, as used by the log DB.
pub const CODEC_DAG_CBOR: u64 = 0x71;
/// The multihash code for SHA-256, the only hash function the bridge supports.
pub const SHA2_256: u64 = 0x12;

/// Parse a database address of the form `"/<scheme>/<root-cid-base58btc>"`
/// into the root CID.
///
/// Fails with `Error::InvalidAddress` if the final path segment isn't a
/// parseable CID, or if the scheme prefix is empty.
pub fn parse_address(address: &str) -> Result<Cid> {
    let invalid = || Error::InvalidAddress {
        address: address.to_string(),
    };

    let mut segments = address.rsplitn(2, '/');
    let last = segments.next().ok_or_else(invalid)?;
    let rest = segments.next().ok_or_else(invalid)?;

    if rest.trim_start_matches('/').is_empty() {
        return Err(invalid());
    }

    Cid::try_from(last).map_err(|_| invalid())
}

/// Compose a database address string from a scheme and root CID, rendering
/// the CID in base58btc as the log-DB convention requires.
pub fn format_address(scheme: &str, root: &Cid) -> Result<String> {
    let rendered = render_base58btc(root)?;
    Ok(format!("/{scheme}/{rendered}"))
}

/// Reinterpret a raw-codec CID as a CBOR-codec CID with the same multihash.
///
/// `raw_to_cbor(cbor_to_raw(c)) == c` for any CBOR-codec, SHA-256 `c`.
pub fn raw_to_cbor(cid: &Cid) -> Result<Cid> {
    reinterpret(cid, CODEC_DAG_CBOR)
}

/// Reinterpret a CBOR-codec CID as a raw-codec CID with the same multihash.
///
/// `cbor_to_raw(raw_to_cbor(c)) == c` for any raw-codec, SHA-256 `c`.
pub fn cbor_to_raw(cid: &Cid) -> Result<Cid> {
    reinterpret(cid, CODEC_RAW)
}

fn reinterpret(cid: &Cid, new_codec: u64) -> Result<Cid> {
    if cid.version() == libipld::cid::Version::V0 {
        return Err(Error::UnsupportedCid { cid: *cid });
    }

    let hash = cid.hash();
    if hash.code() != SHA2_256 {
        return Err(Error::UnsupportedCid { cid: *cid });
    }

    let bridged = Cid::new_v1(new_codec, *hash);
    trace!(from = %cid, to = %bridged, "bridged cid");
    Ok(bridged)
}

/// Render a CID using the base58btc multibase, the log-DB's convention for
/// CBOR-codec CIDs (and database addresses).
pub fn render_base58btc(cid: &Cid) -> Result<String> {
    cid.to_string_of_base(Base::Base58Btc)
        .map_err(|_| Error::UnsupportedCid { cid: *cid })
}

/// Render a CID using the base32(lower) multibase, the remote store's
/// preferred encoding for raw-codec CIDs.
pub fn render_base32(cid: &Cid) -> Result<String> {
    cid.to_string_of_base(Base::Base32Lower)
        .map_err(|_| Error::UnsupportedCid { cid: *cid })
}

/// Compute the raw-codec CID that the remote store would assign to `bytes`
/// (SHA-256 over the bytes, codec 0x55). Used in tests and by in-process
/// fakes of the remote store to simulate its content addressing.
pub fn digest_raw(bytes: &[u8]) -> Cid {
    use libipld::multihash::MultihashDigest;
    let hash = Code::Sha2_256.digest(bytes);
    Cid::new_v1(CODEC_RAW, hash)
}

#[allow(unused)]
fn _assert_dag_cbor_is(cid: Cid) -> bool {
    cid.codec() == <IpldCodec as Into<u64>>::into(IpldCodec::DagCbor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libipld::multihash::MultihashDigest;

    fn cbor_cid(bytes: &[u8]) -> Cid {
        let hash = Code::Sha2_256.digest(bytes);
        Cid::new_v1(CODEC_DAG_CBOR, hash)
    }

    #[test]
    fn roundtrips_cbor_to_raw_and_back() {
        let cbor = cbor_cid(b"hello world");
        let raw = cbor_to_raw(&cbor).unwrap();
        assert_eq!(raw.codec(), CODEC_RAW);
        assert_eq!(raw.hash(), cbor.hash());
        assert_eq!(raw_to_cbor(&raw).unwrap(), cbor);
    }

    #[test]
    fn roundtrips_raw_to_cbor_and_back() {
        let raw = digest_raw(b"some payload");
        let cbor = raw_to_cbor(&raw).unwrap();
        assert_eq!(cbor.codec(), CODEC_DAG_CBOR);
        assert_eq!(cbor_to_raw(&cbor).unwrap(), raw);
    }

    #[test]
    fn parse_address_extracts_root_cid() {
        let cid = cbor_cid(b"root block bytes");
        let address = format_address("orbitdb", &cid).unwrap();
        assert!(address.starts_with("/orbitdb/"));
        assert_eq!(parse_address(&address).unwrap(), cid);
    }

    #[test]
    fn parse_address_rejects_empty_scheme() {
        assert!(parse_address("/notacid").is_err());
    }

    #[test]
    fn parse_address_rejects_garbage() {
        assert!(parse_address("/orbitdb/not-a-cid").is_err());
    }
}

#[cfg(any(test, feature = "test_utils"))]
mod proptests {
    use super::*;
    use libipld::multihash::MultihashDigest;
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn arb_sha256_cid(codec: u64) -> impl Strategy<Value = Cid> {
        proptest::collection::vec(any::<u8>(), 0..256)
            .prop_map(move |bytes| Cid::new_v1(codec, Code::Sha2_256.digest(&bytes)))
    }

    #[proptest]
    fn bridge_roundtrip_cbor(#[strategy(arb_sha256_cid(CODEC_DAG_CBOR))] cid: Cid) {
        prop_assert_eq!(raw_to_cbor(&cbor_to_raw(&cid).unwrap()).unwrap(), cid);
    }

    #[proptest]
    fn bridge_roundtrip_raw(#[strategy(arb_sha256_cid(CODEC_RAW))] cid: Cid) {
        prop_assert_eq!(cbor_to_raw(&raw_to_cbor(&cid).unwrap()).unwrap(), cid);
    }
}
