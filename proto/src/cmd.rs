// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Card command set and per-command capability descriptors

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Commands understood by the card.
///
/// Names match the on-wire `cmd` field exactly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    /// Read card state, including the current rotating nonce
    Status,
    /// Fetch the factory certificate chain
    Certs,
    /// Prove possession of the card key over a caller nonce
    Check,
    /// Signed read of the active slot's payment pubkey
    Read,
    /// Slot master key disclosure (SATSCARD) or derivation change (TAPSIGNER)
    Derive,
    /// Dump the state of one slot
    Dump,
    /// Unseal the active slot
    Unseal,
    /// Fetch the BIP-32 serialized extended public key (TAPSIGNER)
    Xpub,
    /// Sign a 32-byte digest (TAPSIGNER)
    Sign,
    /// Read the encrypted master-secret backup (TAPSIGNER)
    Backup,
    /// Replace the CVC
    Change,
    /// Read the dynamic NDEF URL
    Nfc,
}

/// Whether a command must, may, or cannot carry authentication fields
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuthRequirement {
    /// Command never takes auth fields
    Never,
    /// Auth is optional; response content may differ with it
    Optional,
    /// Card rejects the command without valid auth fields
    Required,
}

/// How much of the session key masks an argument
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MaskWidth {
    /// Argument must be exactly one session key wide
    Full,
    /// Mask truncated to the argument's own length
    ArgLen,
}

/// Descriptor for an argument the session key masks before transmission
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MaskSpec {
    /// Name of the masked argument
    pub field: &'static str,
    pub width: MaskWidth,
}

/// Per-command capabilities
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub auth: AuthRequirement,
    /// Argument masked with the session key, if any
    pub mask: Option<MaskSpec>,
}

impl Command {
    /// On-wire command name
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Capability descriptor for this command
    pub const fn spec(&self) -> CommandSpec {
        use AuthRequirement::*;

        let (auth, mask) = match self {
            Command::Status | Command::Certs | Command::Check | Command::Nfc => (Never, None),
            Command::Read | Command::Derive | Command::Dump => (Optional, None),
            Command::Unseal | Command::Xpub | Command::Backup => (Required, None),
            Command::Sign => (
                Required,
                Some(MaskSpec {
                    field: "digest",
                    width: MaskWidth::Full,
                }),
            ),
            Command::Change => (
                Required,
                Some(MaskSpec {
                    field: "data",
                    width: MaskWidth::ArgLen,
                }),
            ),
        };

        CommandSpec { auth, mask }
    }
}
