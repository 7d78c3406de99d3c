// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Tap card interface library
//!
//! A mistrustful client for tap-activated secure cards (SATSCARD and
//! TAPSIGNER variants): per-command encrypted authentication, rotating
//! anti-replay nonce tracking, and independent verification of every
//! cryptographic claim the card makes before it is trusted.
//!
//! Transports are external: implement [Transport] over your reader stack
//! and hand it to [CardSession::first_look].

/// Re-export protocol definitions for consumers
pub use tapcard_proto as proto;

mod transport;
pub use transport::Transport;

mod error;
pub use error::Error;

mod auth;
pub use auth::{calc_xcvc, AuthFields, SessionKey};

mod card;
pub use card::{CardIdent, CardSession};

pub mod verify;

mod slot;
pub use slot::{classify_slot, SlotAddress, SlotStatus, SlotUsage};

mod tapsigner;
