//! The binary signed intro exchanged right after a session stabilizes.
//!
//! Layout, length-prefixed:
//!
//! ```text
//! byte 0   : pub_len (always 32)
//! byte 1   : sdp_hash_len (always 40)
//! 2..34    : Ed25519 public key
//! 34..74   : ASCII hex SHA-1 of the signer's local SDP
//! 74..     : Ed25519 signature over (pub || sdp_hash)
//! ```
//!
//! The SDP hash binds the identity to the actual session: a rendezvous
//! that swapped descriptions in flight produces a packet whose hash does
//! not match the SDP we observed, and verification fails.

use crate::ecc;
use crate::ecc::KeyPair;
use crate::error::Error;
use crate::error::Result;

const PUB_LEN: usize = 32;
const SDP_HASH_LEN: usize = 40;

/// The outcome of a successful packet verification.
#[derive(Debug, Clone)]
pub struct VerifiedPeer {
    /// The peer's raw public key.
    pub public_key: [u8; PUB_LEN],
    /// The full id derived from the public key.
    pub full_id: String,
}

/// Build the signed intro for a session whose local SDP is `local_sdp`.
pub fn make_sig_packet(keypair: &KeyPair, local_sdp: &str) -> Vec<u8> {
    let public_key = keypair.public_key();
    let sdp_hash = ecc::sha1_hex(local_sdp.as_bytes());

    let mut signed = Vec::with_capacity(PUB_LEN + SDP_HASH_LEN);
    signed.extend_from_slice(&public_key);
    signed.extend_from_slice(sdp_hash.as_bytes());
    let signature = keypair.sign(&signed);

    let mut packet = Vec::with_capacity(2 + signed.len() + signature.len());
    packet.push(PUB_LEN as u8);
    packet.push(SDP_HASH_LEN as u8);
    packet.extend_from_slice(&signed);
    packet.extend_from_slice(&signature);
    packet
}

/// Verify a peer's intro packet.
///
/// `remote_sdp` is the remote description as observed by us, i.e. the
/// signer's local SDP. `advertised_id` is the id the rendezvous claimed
/// for the peer, when one is known; `wanted_id` is the id the caller asked
/// to connect to, when specific. Id comparisons are prefix-symmetric so a
/// ShortID matches the FullID it abbreviates.
pub fn verify_sig_packet(
    packet: &[u8],
    remote_sdp: &str,
    advertised_id: Option<&str>,
    wanted_id: Option<&str>,
) -> Result<VerifiedPeer> {
    if packet.len() < 2 {
        return Err(Error::ClientAuth("intro packet truncated".into()));
    }
    let pub_len = packet[0] as usize;
    let sdp_hash_len = packet[1] as usize;
    if pub_len != PUB_LEN || sdp_hash_len != SDP_HASH_LEN {
        return Err(Error::ClientAuth(format!(
            "unexpected intro lengths: pub={pub_len} sdp_hash={sdp_hash_len}"
        )));
    }
    if packet.len() <= 2 + pub_len + sdp_hash_len {
        return Err(Error::ClientAuth("intro packet missing signature".into()));
    }

    let public_key: [u8; PUB_LEN] = packet[2..2 + pub_len]
        .try_into()
        .map_err(|_| Error::ClientAuth("bad public key".into()))?;
    let sdp_hash = &packet[2 + pub_len..2 + pub_len + sdp_hash_len];
    let signature = &packet[2 + pub_len + sdp_hash_len..];

    let full_id = ecc::make_full_id(&public_key);

    if let Some(advertised) = advertised_id {
        if !ecc::id_prefix_match(&full_id, advertised) {
            return Err(Error::ClientAuth(format!(
                "public key hashes to {full_id}, peer advertised {advertised}"
            )));
        }
    }

    if let Some(wanted) = wanted_id {
        if !ecc::id_prefix_match(&full_id, wanted) {
            return Err(Error::ClientAuth(format!(
                "peer {full_id} is not the wanted {wanted}"
            )));
        }
    }

    let signed = &packet[2..2 + pub_len + sdp_hash_len];
    if !ecc::verify(&public_key, signed, signature) {
        return Err(Error::ClientAuth("intro signature does not verify".into()));
    }

    let expected_hash = ecc::sha1_hex(remote_sdp.as_bytes());
    if sdp_hash != expected_hash.as_bytes() {
        return Err(Error::ClientAuth(
            "SDP hash does not match the session we negotiated".into(),
        ));
    }

    Ok(VerifiedPeer {
        public_key,
        full_id,
    })
}
