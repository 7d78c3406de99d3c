// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Slot lifecycle operations (SATSCARD)
//!
//! Slots move strictly one way: unused, then used and sealed, then
//! unsealed. Classification of the overlapping `dump` fields happens in one
//! place, [classify_slot], so every call site agrees on what a response
//! means.

use log::debug;
use zeroize::Zeroizing;

use tapcard_proto::{cmd::Command, dict::Dict, nonce::pick_nonce};

use crate::{
    card::{want_bytes, want_text, CardSession},
    verify, Error, Transport,
};

/// Lifecycle stage of one key slot
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SlotStatus {
    /// Key generated, private half never revealed
    Sealed,
    /// Private key revealed; the slot is spent
    Unsealed,
    /// No key generated yet
    Unused,
}

/// Classify a `dump` response into exactly one lifecycle stage.
///
/// The raw fields overlap, so order matters: an explicit seal wins, then a
/// revealed private key implies unsealed, then an explicit not-used. A
/// response fitting none of these is an error, never a silent default.
pub fn classify_slot(slot: u8, resp: &Dict) -> Result<SlotStatus, Error> {
    if resp.boolean("sealed") == Some(true) {
        return Ok(SlotStatus::Sealed);
    }
    if resp.boolean("sealed") == Some(false) || resp.contains("privkey") {
        return Ok(SlotStatus::Unsealed);
    }
    if resp.boolean("used") == Some(false) {
        return Ok(SlotStatus::Unused);
    }
    Err(Error::SlotStateUnknown {
        slot,
        detail: format!("{resp:?}"),
    })
}

/// Verified address and provenance for one slot
#[derive(Clone, Debug)]
pub struct SlotAddress {
    pub slot: u8,
    /// bech32 payment address
    pub addr: String,
    /// Slot public key, when the signed `read` path produced it
    pub pubkey: Option<Vec<u8>>,
}

/// Usage summary for one slot
#[derive(Clone, Debug)]
pub struct SlotUsage {
    pub slot: u8,
    pub status: SlotStatus,
    /// Best-known address for the slot
    pub addr: Option<String>,
    /// Full `dump` result for callers needing more
    pub detail: Dict,
}

impl<T: Transport> CardSession<T> {
    fn want_satscard(&self) -> Result<(), Error> {
        match self.ident().tapsigner {
            true => Err(Error::WrongVariant("SATSCARD")),
            false => Ok(()),
        }
    }

    /// Payment address for a slot, fully verified by default.
    ///
    /// `None` when the targeted slot is the active one and not yet set up.
    /// `faster` skips the certificate chain and the independent
    /// re-derivation; only suitable where the card is already trusted.
    pub async fn address(
        &mut self,
        faster: bool,
        slot: Option<u8>,
    ) -> Result<Option<SlotAddress>, Error> {
        self.want_satscard()?;

        if !faster && !self.certs_checked() {
            self.certificate_check().await?;
        }

        let st = self.status().await?;
        let cur_slot = st.slots.0;
        let slot = slot.unwrap_or(cur_slot);

        if slot == cur_slot && st.addr.is_none() {
            // active slot not set up yet
            return Ok(None);
        }

        if slot != cur_slot {
            // historic slots carry no key binding to verify against; the
            // unauthenticated dump result is as good as it gets
            let resp = self
                .send(Command::Dump, Dict::new().with_uint("slot", slot as u64))
                .await?;
            let addr = want_text(Command::Dump, &resp, "addr")?.to_owned();
            return Ok(Some(SlotAddress {
                slot,
                addr,
                pubkey: None,
            }));
        }

        // active slot: prove the key behind the address
        let my_nonce = pick_nonce();
        let read = self
            .send(
                Command::Read,
                Dict::new().with_bytes("nonce", my_nonce.as_slice()),
            )
            .await?;
        let (pubkey, addr) = verify::recover_address(&st, &read, &my_nonce)?;

        if !faster {
            // cross-check: the card must also prove the address came from
            // the slot master key and chain code it discloses
            let my_nonce = pick_nonce();
            let card_nonce = self.card_nonce().to_vec();
            let rr = self
                .send(
                    Command::Derive,
                    Dict::new().with_bytes("nonce", my_nonce.as_slice()),
                )
                .await?;

            let chain_code = want_bytes(Command::Derive, &rr, "chain_code")?;
            let master = verify::verify_master_pubkey(
                want_bytes(Command::Derive, &rr, "master_pubkey")?,
                want_bytes(Command::Derive, &rr, "sig")?,
                chain_code,
                &my_nonce,
                &card_nonce,
            )?;
            let (derived, _) = verify::verify_derive_address(chain_code, &master, st.testnet)?;
            if derived != addr {
                return Err(Error::AddressMismatch);
            }
        }

        debug!("slot {slot} address verified: {addr}");
        Ok(Some(SlotAddress {
            slot,
            addr,
            pubkey: Some(pubkey),
        }))
    }

    /// Unseal the active slot, returning its private key and index.
    ///
    /// The lifecycle only moves one way: a slot that is not used-and-sealed
    /// fails up front with a distinct error, before any authenticated
    /// command is spent.
    pub async fn unseal_slot(&mut self, cvc: &[u8]) -> Result<(Zeroizing<Vec<u8>>, u8), Error> {
        self.want_satscard()?;
        let target = self.active_slot();

        // pre-flight with the unauthenticated dump
        let resp = self
            .send(Command::Dump, Dict::new().with_uint("slot", target as u64))
            .await?;
        match classify_slot(target, &resp)? {
            SlotStatus::Unsealed => return Err(Error::SlotUnsealed(target)),
            SlotStatus::Unused => return Err(Error::SlotUnused(target)),
            SlotStatus::Sealed => (),
        }

        let (key, resp) = self
            .send_auth(
                Command::Unseal,
                Some(cvc),
                Dict::new().with_uint("slot", target as u64),
            )
            .await?;
        let key = key.ok_or(Error::NeedsAuth(Command::Unseal))?;

        let masked = want_bytes(Command::Unseal, &resp, "privkey")?;
        debug!("slot {target} unsealed");
        Ok((Zeroizing::new(key.unmask(masked)), target))
    }

    /// Private key of an already-unsealed slot
    pub async fn get_privkey(&mut self, cvc: &[u8], slot: u8) -> Result<Zeroizing<Vec<u8>>, Error> {
        self.want_satscard()?;

        let (key, resp) = self
            .send_auth(
                Command::Dump,
                Some(cvc),
                Dict::new().with_uint("slot", slot as u64),
            )
            .await?;
        let key = key.ok_or(Error::NeedsAuth(Command::Dump))?;

        match resp.bytes("privkey") {
            Some(masked) => Ok(Zeroizing::new(key.unmask(masked))),
            // distinguish why the key is missing
            None => Err(match classify_slot(slot, &resp)? {
                SlotStatus::Unused => Error::SlotUnused(slot),
                SlotStatus::Sealed => Error::SlotSealed(slot),
                SlotStatus::Unsealed => Error::SlotStateUnknown {
                    slot,
                    detail: "unsealed but no private key returned".to_owned(),
                },
            }),
        }
    }

    /// Address plus lifecycle stage for a slot; the CVC is optional and
    /// unlocks the private-key detail for unsealed slots.
    pub async fn slot_usage(&mut self, slot: u8, cvc: Option<&[u8]>) -> Result<SlotUsage, Error> {
        self.want_satscard()?;

        let (key, resp) = self
            .send_auth(
                Command::Dump,
                cvc,
                Dict::new().with_uint("slot", slot as u64),
            )
            .await?;

        let status = classify_slot(slot, &resp)?;
        let mut addr = resp.text("addr").map(str::to_owned);

        match status {
            SlotStatus::Sealed if slot == self.active_slot() => {
                if let Some(a) = self.address(true, Some(slot)).await? {
                    addr = Some(a.addr);
                }
            }
            SlotStatus::Unsealed => {
                if let (Some(key), Some(masked)) = (&key, resp.bytes("privkey")) {
                    let privkey = Zeroizing::new(key.unmask(masked));
                    addr = Some(verify::render_address(&privkey, self.ident().testnet)?);
                }
            }
            _ => (),
        }

        Ok(SlotUsage {
            slot,
            status,
            addr,
            detail: resp,
        })
    }
}
