// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Per-command session authentication
//!
//! Authenticated commands prove CVC possession without ever sending it: an
//! ephemeral ECDH against the card key yields a one-command session key,
//! additionally bound to the command name and the card's current nonce so
//! it cannot be replayed against another command or a stale nonce.

use k256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey, SecretKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use tapcard_proto::{Command, CVC_MAX_SIZE, CVC_MIN_SIZE, SESSION_KEY_SIZE};

use crate::Error;

/// Ephemeral key masking one sensitive field of one command exchange.
///
/// Never serialized, never printed; zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    fn new(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// XOR `data` against the key, truncating the key to `data.len()`
    pub fn mask(&self, data: &[u8]) -> Vec<u8> {
        data.iter().zip(self.0.iter()).map(|(d, k)| d ^ k).collect()
    }

    /// Alias of [SessionKey::mask]: XOR is its own inverse
    pub fn unmask(&self, data: &[u8]) -> Vec<u8> {
        self.mask(data)
    }
}

impl core::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Authentication fields attached to one authenticated command
#[derive(Clone, Debug)]
pub struct AuthFields {
    /// Our ephemeral public key, compressed
    pub epubkey: Vec<u8>,
    /// CVC, XOR-masked under the session key and nonce / command binding
    pub xcvc: Vec<u8>,
}

/// Derive the session key and auth fields for one authenticated command.
///
/// Two calls with the same CVC but different nonces produce unrelated keys.
pub fn calc_xcvc(
    cmd: Command,
    card_nonce: &[u8],
    card_pubkey: &[u8],
    cvc: &[u8],
) -> Result<(SessionKey, AuthFields), Error> {
    if cvc.len() < CVC_MIN_SIZE || cvc.len() > CVC_MAX_SIZE {
        return Err(Error::CvcLength(cvc.len()));
    }

    let card_key =
        PublicKey::from_sec1_bytes(card_pubkey).map_err(|_| Error::InvalidKey("card pubkey"))?;

    // fresh ephemeral key for our side of the exchange
    let eph = SecretKey::random(&mut OsRng);
    let epubkey = eph.public_key().to_encoded_point(true).as_bytes().to_vec();

    // session key is the hash of the compressed shared point
    let shared = (card_key.to_projective() * *eph.to_nonzero_scalar()).to_affine();
    let session_key =
        SessionKey::new(Sha256::digest(shared.to_encoded_point(true).as_bytes()).into());

    // mask the CVC under the key, bound to (nonce, command)
    let md = Sha256::new()
        .chain_update(card_nonce)
        .chain_update(cmd.name().as_bytes())
        .finalize();
    let xcvc = cvc
        .iter()
        .zip(session_key.0.iter().zip(md.iter()))
        .map(|(c, (k, m))| c ^ k ^ m)
        .collect();

    Ok((session_key, AuthFields { epubkey, xcvc }))
}
