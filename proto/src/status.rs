// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Typed view of the `status` response

use crate::{dict::Dict, ProtoError};

/// Decoded `status` response.
///
/// Field names and encodings are fixed by the card protocol; this struct is
/// the typed view the engine works from.
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    /// Protocol version the card implements
    pub proto: u64,

    /// Applet version, e.g. `"1.0.0"`
    pub ver: String,

    /// Block height at card birth, when reported
    pub birth: Option<u64>,

    /// Card public key, compressed (33 bytes)
    pub pubkey: Vec<u8>,

    /// Rotating nonce at the time of this response
    pub card_nonce: Option<Vec<u8>>,

    /// Card addresses testnet
    pub testnet: bool,

    /// Card is the TAPSIGNER variant
    pub tapsigner: bool,

    /// (active, total) slots; `(0, 1)` when the card reports none
    pub slots: (u8, u8),

    /// Partial payment address for the active slot, middle elided
    pub addr: Option<String>,

    /// Current derivation path (TAPSIGNER)
    pub path: Option<Vec<u32>>,

    /// Number of backups taken so far (TAPSIGNER)
    pub num_backups: Option<u64>,

    /// Outstanding auth-failure delay, in `wait` rounds
    pub auth_delay: u64,
}

impl TryFrom<&Dict> for Status {
    type Error = ProtoError;

    fn try_from(d: &Dict) -> Result<Self, ProtoError> {
        Ok(Self {
            proto: d.uint("proto").ok_or(ProtoError::MissingField("proto"))?,
            ver: d.require_text("ver")?.to_owned(),
            birth: d.uint("birth"),
            pubkey: d.require_bytes("pubkey")?.to_vec(),
            card_nonce: d.bytes("card_nonce").map(|b| b.to_vec()),
            testnet: d.boolean("testnet").unwrap_or(false),
            tapsigner: d.boolean("tapsigner").unwrap_or(false),
            slots: d
                .pair("slots")
                .map(|(active, total)| (active as u8, total as u8))
                .unwrap_or((0, 1)),
            addr: d.text("addr").map(str::to_owned),
            path: d.path("path"),
            num_backups: d.uint("num_backups"),
            auth_delay: d.uint("auth_delay").unwrap_or(0),
        })
    }
}
