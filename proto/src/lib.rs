// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol definitions for tap card communication
//!
//! This crate carries the protocol-level vocabulary shared by clients and
//! test fixtures: the command set with per-command capability descriptors,
//! the CBOR argument/result map type, card error codes, nonce rules and
//! derivation-path encoding.
//!
//! Commands and responses travel as CBOR maps with text keys; NFC / APDU
//! framing is a transport concern and lives outside this crate.

use const_decoder::Decoder;

pub mod cmd;
pub mod dict;
pub mod errcode;
pub mod nonce;
pub mod path;
pub mod status;

pub use cmd::{AuthRequirement, Command, CommandSpec, MaskSpec, MaskWidth};
pub use dict::{Dict, Value};
pub use errcode::ErrorCode;
pub use status::Status;

/// Status word for a successfully executed command
pub const SW_OKAY: u16 = 0x9000;

/// Card protocol version implemented by this crate
pub const PROTO_VERSION: u64 = 1;

/// Length of the rotating anti-replay nonce issued by the card
pub const CARD_NONCE_SIZE: usize = 16;

/// Length of caller-picked nonces bound into signed card responses
pub const USER_NONCE_SIZE: usize = 16;

/// Fixed header prefixed to every message the card signs
pub const AUTH_HEADER: &[u8; 8] = b"OPENDIME";

/// Session keys are one SHA-256 output wide
pub const SESSION_KEY_SIZE: usize = 32;

/// Compressed secp256k1 public key length
pub const PUBKEY_SIZE: usize = 33;

/// Plain (r, s) signature length
pub const SIG_SIZE: usize = 64;

/// Recoverable signature length, as used in the certificate chain
pub const REC_SIG_SIZE: usize = 65;

/// Inclusive lower bound on CVC length, in bytes
pub const CVC_MIN_SIZE: usize = 6;

/// Inclusive upper bound on CVC length, in bytes
pub const CVC_MAX_SIZE: usize = 32;

/// Factory root certificate public key, in effect from 2021-04-28.
///
/// Certificate chains must terminate here for a card to be considered
/// genuine.
pub const FACTORY_ROOT_PUBKEY: [u8; PUBKEY_SIZE] =
    Decoder::Hex.decode(b"03028a0e89e70d0ec0d932053a89ab1da7d9182bdc6d2f03e706ee99517d05d9e1");

/// Protocol-level encode / decode errors
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// Map encode / decode failure from the CBOR codec
    #[error("cbor: {0}")]
    Cbor(#[from] serde_cbor::Error),

    /// A map is missing a required field
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// A field decoded to an unexpected CBOR type or width
    #[error("bad value for field '{0}'")]
    BadField(&'static str),

    /// A derivation path string could not be parsed
    #[error("bad derivation path: {0}")]
    BadPath(String),
}
