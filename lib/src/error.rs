// Copyright (c) 2022-2023 The MobileCoin Foundation

use tapcard_proto::{Command, ProtoError};

/// Tap card API error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure below the protocol layer
    #[error("transport: {0}")]
    Transport(#[source] anyhow::Error),

    /// The card reported a command failure
    #[error("{code} on {cmd}: {msg}")]
    Card { cmd: Command, code: u16, msg: String },

    /// Card speaks a protocol version we do not
    #[error("unsupported card protocol version {0}")]
    ProtocolVersion(u64),

    /// A response that must carry a nonce did not
    #[error("card response carried no nonce")]
    MissingNonce,

    /// Nonce material of the wrong width
    #[error("bad nonce length")]
    NonceLength,

    /// Card public key changed across a refresh
    #[error("card public key changed mid-session")]
    IdentityChanged,

    /// Required field absent from a command exchange
    #[error("{cmd}: missing field '{field}'")]
    MissingField { cmd: Command, field: &'static str },

    /// Map encode / decode or field typing failure
    #[error(transparent)]
    Proto(#[from] ProtoError),

    /// CVC outside the allowed bounds
    #[error("CVC must be 6 to 32 bytes, got {0}")]
    CvcLength(usize),

    /// Command requires a CVC
    #[error("{0} requires a CVC")]
    NeedsAuth(Command),

    /// Masked argument has the wrong width
    #[error("argument '{field}' for {cmd} must be {expect} bytes")]
    MaskWidth {
        cmd: Command,
        field: &'static str,
        expect: usize,
    },

    /// Operation not available on this card variant
    #[error("operation is only available on {0} cards")]
    WrongVariant(&'static str),

    /// Derivation path must be fully hardened
    #[error("derivation path components must all be hardened")]
    PathNotHardened,

    /// Slot has never held a key
    #[error("slot {0} has not been used yet")]
    SlotUnused(u8),

    /// Slot was already unsealed
    #[error("slot {0} has already been unsealed")]
    SlotUnsealed(u8),

    /// Slot is still sealed
    #[error("slot {0} has not been unsealed yet")]
    SlotSealed(u8),

    /// Slot response fits no lifecycle stage
    #[error("cannot classify state of slot {slot}: {detail}")]
    SlotStateUnknown { slot: u8, detail: String },

    /// Key material from the card failed to parse
    #[error("invalid {0} from card")]
    InvalidKey(&'static str),

    /// A card signature failed verification
    #[error("bad card signature over {0}")]
    BadSignature(&'static str),

    /// Certificate chain structurally invalid
    #[error("certificate chain: {0}")]
    CertChain(&'static str),

    /// Certificate chain root is not a trusted factory key
    #[error("certificate chain root is not a trusted factory key")]
    UntrustedRoot,

    /// Independent address derivations disagree
    #[error("card did not derive address as expected")]
    AddressMismatch,

    /// Address text encoding failed
    #[error("address encoding: {0}")]
    Encoding(#[from] bech32::Error),
}
