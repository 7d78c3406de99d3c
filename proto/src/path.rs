// Copyright (c) 2022-2023 The MobileCoin Foundation

//! BIP-32 derivation path encoding
//!
//! Paths travel on the wire as arrays of `u32` components with the hardened
//! bit set; callers see `m/84h/0h/0h` style text.

use crate::ProtoError;

/// Hardened-derivation bit
pub const HARDENED: u32 = 0x8000_0000;

/// True when every component is hardened
pub fn all_hardened(path: &[u32]) -> bool {
    path.iter().all(|c| c & HARDENED != 0)
}

/// Render a wire path as text
pub fn path_to_str(path: &[u32]) -> String {
    let mut out = String::from("m");
    for c in path {
        out.push('/');
        out.push_str(&(c & !HARDENED).to_string());
        if c & HARDENED != 0 {
            out.push('h');
        }
    }
    out
}

/// Parse `m/84h/0h/0h` style text; `'` is accepted for hardened as well
pub fn str_to_path(s: &str) -> Result<Vec<u32>, ProtoError> {
    let bad = || ProtoError::BadPath(s.to_owned());

    let mut parts = s.trim().split('/');
    match parts.next() {
        Some("m") | Some("M") => (),
        _ => return Err(bad()),
    }

    let mut path = Vec::new();
    for part in parts {
        let (digits, hardened) = match part.strip_suffix(['h', 'H', '\'']) {
            Some(digits) => (digits, HARDENED),
            None => (part, 0),
        };
        let c: u32 = digits.parse().map_err(|_| bad())?;
        if c >= HARDENED {
            return Err(bad());
        }
        path.push(c | hardened);
    }

    Ok(path)
}
