// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol engine: session state, command dispatch, nonce rotation
//!
//! [CardSession] owns one card connection. Identity fields are captured at
//! [CardSession::first_look] and never change; the rotating nonce advances
//! with every response that carries one, success or error alike.

use core::fmt;

use log::debug;

use tapcard_proto::{
    cmd::{AuthRequirement, Command, MaskWidth},
    dict::Dict,
    nonce::pick_nonce,
    status::Status,
    ErrorCode, CVC_MAX_SIZE, CVC_MIN_SIZE, FACTORY_ROOT_PUBKEY, PROTO_VERSION, SESSION_KEY_SIZE,
    SW_OKAY,
};

use crate::{
    auth::{calc_xcvc, SessionKey},
    verify, Error, Transport,
};

/// Immutable card identity, fixed at first contact
#[derive(Clone, Debug, PartialEq)]
pub struct CardIdent {
    /// Card public key, compressed
    pub pubkey: Vec<u8>,
    /// Human-readable identity derived from the public key
    pub ident: String,
    /// Protocol version
    pub proto: u64,
    /// Applet version string
    pub ver: String,
    /// Block height at card birth
    pub birth: Option<u64>,
    /// Card addresses testnet
    pub testnet: bool,
    /// TAPSIGNER variant (reusable signing key) vs SATSCARD (slots)
    pub tapsigner: bool,
    /// Total slot count
    pub num_slots: u8,
}

impl fmt::Display for CardIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = if self.tapsigner { "TAPSIGNER" } else { "SATSCARD" };
        write!(f, "<{} {}: {}>", variant, self.ident, hex::encode(&self.pubkey))
    }
}

/// Mutable protocol state, advanced by responses
#[derive(Debug)]
struct ProtoState {
    /// Rotating anti-replay nonce, consumed by the next bound command
    nonce: Vec<u8>,
    /// Active slot index
    active_slot: u8,
    /// Outstanding auth-failure delay
    auth_delay: u64,
}

/// Verification results cached for the session
#[derive(Debug, Default)]
struct VerifyCache {
    /// Certificate chain validated since the last trust-root change
    certs_checked: bool,
}

/// One authenticated card connection.
///
/// A physical card transacts strictly serially, so methods take `&mut self`
/// and there is no internal locking; use one session per card. Construct
/// with [CardSession::first_look]; [CardSession::close] consumes the
/// session, making further operations unrepresentable.
pub struct CardSession<T: Transport> {
    transport: T,
    ident: CardIdent,
    state: ProtoState,
    verify: VerifyCache,
    trust_roots: Vec<Vec<u8>>,
}

impl<T: Transport> fmt::Debug for CardSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardSession")
            .field("ident", &self.ident)
            .field("state", &self.state)
            .field("verify", &self.verify)
            .field("trust_roots", &self.trust_roots)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> CardSession<T> {
    /// Open a session: read `status` once and capture card identity.
    ///
    /// There is no version negotiation; a card speaking another protocol
    /// version is fatal, as is an initial response without a nonce.
    pub async fn first_look(transport: T) -> Result<Self, Error> {
        let resp = exchange(&transport, Command::Status, Dict::new()).await?;
        let resp = raise_on_error(Command::Status, resp)?;
        let status = Status::try_from(&resp).map_err(Error::from)?;

        if status.proto != PROTO_VERSION {
            return Err(Error::ProtocolVersion(status.proto));
        }
        let nonce = status.card_nonce.clone().ok_or(Error::MissingNonce)?;

        let ident = CardIdent {
            ident: verify::card_pubkey_to_ident(&status.pubkey)?,
            pubkey: status.pubkey.clone(),
            proto: status.proto,
            ver: status.ver.clone(),
            birth: status.birth,
            testnet: status.testnet,
            tapsigner: status.tapsigner,
            num_slots: status.slots.1,
        };
        debug!(
            "card {}: applet {}, slot {}/{}",
            ident.ident, ident.ver, status.slots.0, ident.num_slots
        );

        Ok(Self {
            transport,
            ident,
            state: ProtoState {
                nonce,
                active_slot: status.slots.0,
                auth_delay: status.auth_delay,
            },
            verify: VerifyCache::default(),
            trust_roots: vec![FACTORY_ROOT_PUBKEY.to_vec()],
        })
    }

    /// Re-read `status` and refresh the mutable state.
    ///
    /// Safe to repeat at any point. Fails if the card's public key changed,
    /// which means a different card is now on the reader.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        let st = self.status().await?;
        if st.pubkey != self.ident.pubkey {
            return Err(Error::IdentityChanged);
        }
        Ok(())
    }

    /// Card identity
    pub fn ident(&self) -> &CardIdent {
        &self.ident
    }

    /// Nonce the next bound command will consume
    pub fn card_nonce(&self) -> &[u8] {
        &self.state.nonce
    }

    /// Active slot index, as of the last `status`
    pub fn active_slot(&self) -> u8 {
        self.state.active_slot
    }

    /// Outstanding auth-failure delay
    pub fn auth_delay(&self) -> u64 {
        self.state.auth_delay
    }

    /// Certificate chain verified this session
    pub fn certs_checked(&self) -> bool {
        self.verify.certs_checked
    }

    /// Replace the trusted factory roots (test rigs, development cards).
    ///
    /// Drops the sticky certificate verdict: the chain must re-verify
    /// against the new set.
    pub fn set_trust_roots(&mut self, roots: Vec<Vec<u8>>) {
        self.trust_roots = roots;
        self.verify.certs_checked = false;
    }

    /// Tear down the session, handing the transport back
    pub fn close(self) -> T {
        self.transport
    }

    /// Dispatch a command, keeping any error fields in the result map.
    ///
    /// The rotating nonce still updates: the card advances it per request,
    /// error or not.
    pub async fn send_raw(&mut self, cmd: Command, args: Dict) -> Result<Dict, Error> {
        let resp = exchange(&self.transport, cmd, args).await?;
        if let Some(nonce) = resp.bytes("card_nonce") {
            self.state.nonce = nonce.to_vec();
        }
        Ok(resp)
    }

    /// Dispatch a command; card-reported failures become [Error::Card]
    pub async fn send(&mut self, cmd: Command, args: Dict) -> Result<Dict, Error> {
        let resp = self.send_raw(cmd, args).await?;
        raise_on_error(cmd, resp)
    }

    /// Dispatch an authenticated command.
    ///
    /// Derives a session key bound to the current nonce and attaches the
    /// auth fields; the exchange consumes that nonce. Arguments flagged in
    /// the command's capability descriptor are masked with the fresh key
    /// before transmission. Omitting the CVC is allowed only where the
    /// descriptor marks auth optional.
    pub async fn send_auth(
        &mut self,
        cmd: Command,
        cvc: Option<&[u8]>,
        mut args: Dict,
    ) -> Result<(Option<SessionKey>, Dict), Error> {
        let spec = cmd.spec();

        let session_key = match cvc {
            Some(cvc) => {
                let (key, auth) = calc_xcvc(cmd, &self.state.nonce, &self.ident.pubkey, cvc)?;
                args.insert_bytes("epubkey", auth.epubkey);
                args.insert_bytes("xcvc", auth.xcvc);
                Some(key)
            }
            None if spec.auth == AuthRequirement::Required => {
                return Err(Error::NeedsAuth(cmd));
            }
            None => None,
        };

        // commands with an encrypted argument: mask it with the fresh key
        if let (Some(mask), Some(key)) = (spec.mask, &session_key) {
            let data = args.bytes(mask.field).ok_or(Error::MissingField {
                cmd,
                field: mask.field,
            })?;
            if mask.width == MaskWidth::Full && data.len() != SESSION_KEY_SIZE {
                return Err(Error::MaskWidth {
                    cmd,
                    field: mask.field,
                    expect: SESSION_KEY_SIZE,
                });
            }
            let masked = key.mask(data);
            args.insert_bytes(mask.field, masked);
        }

        let resp = self.send(cmd, args).await?;
        Ok((session_key, resp))
    }

    /// Typed `status` read; refreshes the active slot and auth-delay
    pub async fn status(&mut self) -> Result<Status, Error> {
        let resp = self.send(Command::Status, Dict::new()).await?;
        let st = Status::try_from(&resp).map_err(Error::from)?;
        self.state.active_slot = st.slots.0;
        self.state.auth_delay = st.auth_delay;
        Ok(st)
    }

    /// Dynamic NDEF URL a phone tap would open
    pub async fn nfc_url(&mut self) -> Result<String, Error> {
        let resp = self.send(Command::Nfc, Dict::new()).await?;
        Ok(want_text(Command::Nfc, &resp, "url")?.to_owned())
    }

    /// Replace the CVC (6 to 32 arbitrary bytes).
    ///
    /// The replacement travels masked under the session key, per the
    /// `change` capability descriptor.
    pub async fn change_cvc(&mut self, old_cvc: &[u8], new_cvc: &[u8]) -> Result<(), Error> {
        if new_cvc.len() < CVC_MIN_SIZE || new_cvc.len() > CVC_MAX_SIZE {
            return Err(Error::CvcLength(new_cvc.len()));
        }
        self.send_auth(
            Command::Change,
            Some(old_cvc),
            Dict::new().with_bytes("data", new_cvc),
        )
        .await?;
        Ok(())
    }

    /// Verify the factory certificate chain for this card.
    ///
    /// Proves the card key came out of the factory; unrelated to payment
    /// addresses or slot state. The verdict is sticky for the session, so
    /// later address fetches skip it; call this again to force a re-check.
    pub async fn certificate_check(&mut self) -> Result<(), Error> {
        let st = self.status().await?;
        let certs = self.send(Command::Certs, Dict::new()).await?;

        // the nonce `check` will consume, as of right now
        let card_nonce = self.state.nonce.clone();
        let my_nonce = pick_nonce();
        let check = self
            .send(
                Command::Check,
                Dict::new().with_bytes("nonce", my_nonce.as_slice()),
            )
            .await?;

        verify::verify_certs(&st, &check, &certs, &card_nonce, &my_nonce, &self.trust_roots)?;
        self.verify.certs_checked = true;
        debug!("certificate chain verified for {}", self.ident.ident);
        Ok(())
    }
}

/// One transport round trip; a bad status word is annotated into the map
async fn exchange<T: Transport>(transport: &T, cmd: Command, args: Dict) -> Result<Dict, Error> {
    debug!("sending {cmd}");
    let (sw, mut resp) = transport.send(cmd, args).await.map_err(Error::Transport)?;

    if sw != SW_OKAY {
        // any bad SW is a failure, whether or not the card says so
        if !resp.contains("error") {
            resp.insert_text("error", format!("bad status word 0x{sw:04x}"));
        }
        resp.insert_uint("stat_word", sw as u64);
    }

    Ok(resp)
}

/// Convert a card `error` field into a structured failure
fn raise_on_error(cmd: Command, mut resp: Dict) -> Result<Dict, Error> {
    if let Some(msg) = resp.take_text("error") {
        let code = resp
            .uint("code")
            .map(|c| c as u16)
            .unwrap_or_else(|| u16::from(ErrorCode::Unknown));
        return Err(Error::Card { cmd, code, msg });
    }
    Ok(resp)
}

pub(crate) fn want_bytes<'a>(
    cmd: Command,
    resp: &'a Dict,
    field: &'static str,
) -> Result<&'a [u8], Error> {
    resp.bytes(field).ok_or(Error::MissingField { cmd, field })
}

pub(crate) fn want_text<'a>(
    cmd: Command,
    resp: &'a Dict,
    field: &'static str,
) -> Result<&'a str, Error> {
    resp.text(field).ok_or(Error::MissingField { cmd, field })
}
