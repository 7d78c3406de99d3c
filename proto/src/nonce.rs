// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Caller nonce generation

use rand_core::{OsRng, RngCore};

use crate::USER_NONCE_SIZE;

/// Pick a nonce for replay binding.
///
/// The card rejects degenerate values (all bytes equal), so sample until the
/// draw passes; with an honest RNG the first draw is essentially always
/// enough.
pub fn pick_nonce() -> [u8; USER_NONCE_SIZE] {
    let mut rng = OsRng;
    let mut nonce = [0u8; USER_NONCE_SIZE];

    for _ in 0..3 {
        rng.fill_bytes(&mut nonce);
        if nonce.iter().any(|b| *b != nonce[0]) {
            break;
        }
    }

    nonce
}
