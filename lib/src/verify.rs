// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Independent verification of the card's cryptographic claims
//!
//! The client is a mistrustful verifier: addresses, the certificate chain
//! and the master public key are only trusted after they check out against
//! material the card signed over nonces we picked. Any failure here is
//! fatal to the caller; there is no degraded mode.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use k256::{
    ecdsa::{signature::hazmat::PrehashVerifier, RecoveryId, Signature, VerifyingKey},
    elliptic_curve::{sec1::ToEncodedPoint, PrimeField},
    ProjectivePoint, PublicKey, Scalar, SecretKey,
};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};

use tapcard_proto::{
    dict::Dict, status::Status, Command, AUTH_HEADER, CARD_NONCE_SIZE, PUBKEY_SIZE, REC_SIG_SIZE,
    SIG_SIZE, USER_NONCE_SIZE,
};

use crate::Error;

type HmacSha512 = Hmac<Sha512>;

/// RIPEMD-160 over SHA-256
pub(crate) fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

fn parse_pubkey(bytes: &[u8], what: &'static str) -> Result<PublicKey, Error> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| Error::InvalidKey(what))
}

fn parse_sig(bytes: &[u8], what: &'static str) -> Result<Signature, Error> {
    if bytes.len() != SIG_SIZE {
        return Err(Error::BadSignature(what));
    }
    let sig = Signature::from_slice(bytes).map_err(|_| Error::BadSignature(what))?;
    Ok(sig.normalize_s().unwrap_or(sig))
}

fn verify_sig(
    pubkey: &PublicKey,
    digest: &[u8],
    sig: &Signature,
    what: &'static str,
) -> Result<(), Error> {
    VerifyingKey::from(*pubkey)
        .verify_prehash(digest, sig)
        .map_err(|_| Error::BadSignature(what))
}

/// Human identity for a card: base32 of the key hash, dash-grouped.
///
/// The first 8 hash bytes are skipped; they already leak via the NFC URL.
pub fn card_pubkey_to_ident(card_pubkey: &[u8]) -> Result<String, Error> {
    if card_pubkey.len() != PUBKEY_SIZE {
        return Err(Error::InvalidKey("card pubkey"));
    }
    let md = BASE32_NOPAD.encode(&Sha256::digest(card_pubkey)[8..]);
    let groups: Vec<&str> = (0..20).step_by(5).map(|i| &md[i..i + 5]).collect();
    Ok(groups.join("-"))
}

/// Message the card signs: fixed header, its nonce, ours, context suffix
fn signed_message(card_nonce: &[u8], my_nonce: &[u8], suffix: &[u8]) -> Result<Vec<u8>, Error> {
    if card_nonce.len() != CARD_NONCE_SIZE || my_nonce.len() != USER_NONCE_SIZE {
        return Err(Error::NonceLength);
    }

    let mut msg =
        Vec::with_capacity(AUTH_HEADER.len() + card_nonce.len() + my_nonce.len() + suffix.len());
    msg.extend_from_slice(AUTH_HEADER);
    msg.extend_from_slice(card_nonce);
    msg.extend_from_slice(my_nonce);
    msg.extend_from_slice(suffix);
    Ok(msg)
}

/// Verify the factory certificate chain.
///
/// The card must sign our nonce with its claimed key, and the recoverable
/// signature chain over successive key hashes must land on a trusted root.
pub fn verify_certs(
    status: &Status,
    check: &Dict,
    certs: &Dict,
    card_nonce: &[u8],
    my_nonce: &[u8],
    trust_roots: &[Vec<u8>],
) -> Result<(), Error> {
    let chain = certs
        .bytes_list("cert_chain")
        .ok_or(Error::CertChain("missing cert_chain"))?;
    if chain.len() < 2 {
        return Err(Error::CertChain("chain too short"));
    }

    // the card proves possession of its claimed key over our nonce
    let auth_sig = check
        .bytes("auth_sig")
        .ok_or(Error::MissingField {
            cmd: Command::Check,
            field: "auth_sig",
        })?;
    let msg = signed_message(card_nonce, my_nonce, &[])?;
    let card_key = parse_pubkey(&status.pubkey, "card pubkey")?;
    verify_sig(
        &card_key,
        &Sha256::digest(&msg),
        &parse_sig(auth_sig, "check nonce")?,
        "check nonce",
    )?;

    // walk the chain: each signature recovers the next signer from the
    // hash of the previous key, ending at the factory root
    let mut pubkey = status.pubkey.clone();
    for sig in &chain {
        pubkey = recover_pubkey(&Sha256::digest(&pubkey), sig)?;
    }

    if !trust_roots.iter().any(|root| root[..] == pubkey[..]) {
        return Err(Error::UntrustedRoot);
    }
    Ok(())
}

/// Recover a signer from a 65-byte recoverable signature
fn recover_pubkey(digest: &[u8], sig: &[u8]) -> Result<Vec<u8>, Error> {
    if sig.len() != REC_SIG_SIZE {
        return Err(Error::CertChain("bad signature length"));
    }
    let rec_id = RecoveryId::from_byte(sig[0].wrapping_sub(27) & 0x03)
        .ok_or(Error::CertChain("bad recovery id"))?;
    let signature =
        Signature::from_slice(&sig[1..]).map_err(|_| Error::CertChain("bad signature"))?;
    let key = VerifyingKey::recover_from_prehash(digest, &signature, rec_id)
        .map_err(|_| Error::CertChain("key recovery failed"))?;
    Ok(key.to_encoded_point(true).as_bytes().to_vec())
}

/// Verify the signed `read` response and rebuild the slot address.
///
/// The slot key signs over both nonces and the slot index; the rendered
/// address must agree with the partial address the card reports.
pub fn recover_address(
    status: &Status,
    read_resp: &Dict,
    my_nonce: &[u8],
) -> Result<(Vec<u8>, String), Error> {
    let card_nonce = status.card_nonce.as_deref().ok_or(Error::MissingNonce)?;
    let pubkey = read_resp.bytes("pubkey").ok_or(Error::MissingField {
        cmd: Command::Read,
        field: "pubkey",
    })?;
    let sig = read_resp.bytes("sig").ok_or(Error::MissingField {
        cmd: Command::Read,
        field: "sig",
    })?;

    let msg = signed_message(card_nonce, my_nonce, &[status.slots.0])?;
    let slot_key = parse_pubkey(pubkey, "slot pubkey")?;
    verify_sig(
        &slot_key,
        &Sha256::digest(&msg),
        &parse_sig(sig, "read")?,
        "read",
    )?;

    let addr = render_address(pubkey, status.testnet)?;

    // counterfeiting check: the partial address the card shows must frame
    // the one we just derived
    if let Some(expect) = &status.addr {
        let left = &expect[..expect.find('_').unwrap_or(0)];
        let right = &expect[expect.rfind('_').map(|i| i + 1).unwrap_or(expect.len())..];
        if !addr.starts_with(left) || !addr.ends_with(right) {
            return Err(Error::AddressMismatch);
        }
    }

    Ok((pubkey.to_vec(), addr))
}

/// Verify the master key disclosure from `derive`.
///
/// The master key must sign over both nonces and the chain code it claims.
pub fn verify_master_pubkey(
    master_pubkey: &[u8],
    sig: &[u8],
    chain_code: &[u8],
    my_nonce: &[u8],
    card_nonce: &[u8],
) -> Result<Vec<u8>, Error> {
    if chain_code.len() != 32 {
        return Err(Error::InvalidKey("chain code"));
    }
    let msg = signed_message(card_nonce, my_nonce, chain_code)?;
    let key = parse_pubkey(master_pubkey, "master pubkey")?;
    verify_sig(
        &key,
        &Sha256::digest(&msg),
        &parse_sig(sig, "derive")?,
        "derive",
    )?;
    Ok(master_pubkey.to_vec())
}

/// Payment address for a key; accepts a private (32) or public (33) key
pub fn render_address(key: &[u8], testnet: bool) -> Result<String, Error> {
    let pubkey = match key.len() {
        32 => {
            let sk = SecretKey::from_slice(key).map_err(|_| Error::InvalidKey("slot privkey"))?;
            sk.public_key().to_encoded_point(true).as_bytes().to_vec()
        }
        PUBKEY_SIZE => key.to_vec(),
        _ => return Err(Error::InvalidKey("address key")),
    };

    let hrp = if testnet { "tb" } else { "bc" };
    segwit_v0(hrp, &hash160(&pubkey))
}

/// Native segwit v0 encoding
fn segwit_v0(hrp: &str, program: &[u8; 20]) -> Result<String, Error> {
    use bech32::{ToBase32, Variant};

    let mut data = vec![bech32::u5::try_from_u8(0)?];
    data.extend(program.to_base32());
    Ok(bech32::encode(hrp, data, Variant::Bech32)?)
}

/// Re-derive the slot address independently: BIP-32 child 0 of the
/// disclosed master key and chain code.
pub fn verify_derive_address(
    chain_code: &[u8],
    master_pubkey: &[u8],
    testnet: bool,
) -> Result<(String, Vec<u8>), Error> {
    let pubkey = ckd_pub(master_pubkey, chain_code, 0)?;
    Ok((render_address(&pubkey, testnet)?, pubkey))
}

/// One non-hardened BIP-32 public child derivation
fn ckd_pub(parent: &[u8], chain_code: &[u8], index: u32) -> Result<Vec<u8>, Error> {
    if index & 0x8000_0000 != 0 {
        return Err(Error::InvalidKey("hardened child of a public parent"));
    }

    let parent_key = parse_pubkey(parent, "master pubkey")?;
    let mut mac =
        HmacSha512::new_from_slice(chain_code).map_err(|_| Error::InvalidKey("chain code"))?;
    mac.update(parent_key.to_encoded_point(true).as_bytes());
    mac.update(&index.to_be_bytes());
    let i = mac.finalize().into_bytes();

    let il: [u8; 32] = i[..32].try_into().map_err(|_| Error::InvalidKey("child tweak"))?;
    let tweak = Option::<Scalar>::from(Scalar::from_repr(il.into()))
        .filter(|s| !bool::from(s.is_zero()))
        .ok_or(Error::InvalidKey("child tweak"))?;

    let child = ProjectivePoint::GENERATOR * tweak + parent_key.to_projective();
    let child =
        PublicKey::from_affine(child.to_affine()).map_err(|_| Error::InvalidKey("child key"))?;
    Ok(child.to_encoded_point(true).as_bytes().to_vec())
}
