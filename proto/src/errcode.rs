// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Numeric error codes reported by the card

use num_enum::{FromPrimitive, IntoPrimitive};

/// Card error codes: the `code` field accompanying an `error` response
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum ErrorCode {
    /// Card could not complete the operation (rare; retry with fresh material)
    UnluckyNumber = 205,

    /// Invalid or incomplete arguments
    BadArguments = 400,

    /// Authentication details are wrong
    BadAuth = 401,

    /// Command requires authentication
    NeedsAuth = 403,

    /// Unknown command
    UnknownCommand = 404,

    /// Command not valid for this card variant
    InvalidCommand = 405,

    /// Command not allowed in the current state
    InvalidState = 406,

    /// Supplied nonce is too weak
    WeakNonce = 417,

    /// Request was not well-formed CBOR
    BadCbor = 422,

    /// A backup must be taken first
    BackupFirst = 425,

    /// Too many authentication failures, delay in force
    RateLimited = 429,

    /// Generic failure; also assumed when the card omits a code
    #[num_enum(default)]
    Unknown = 500,
}
