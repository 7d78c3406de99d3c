//! Test helpers: logging setup plus a software card.
//!
//! [SoftCard] implements [Transport] with real secp256k1 keys: a forgeable
//! factory certificate chain, per-slot keys derived from a master key and
//! chain code, CVC authentication and the same nonce-rotation rules as
//! hardware. Fault-injection knobs produce a card that lies, for exercising
//! the verification failure paths.

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use k256::{
    ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey},
    elliptic_curve::{sec1::ToEncodedPoint, PrimeField},
    PublicKey, Scalar,
};
use log::LevelFilter;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512};
use simplelog::SimpleLogger;

use tapcard::{
    proto::{Command, Dict, ErrorCode, Value, SW_OKAY},
    verify, CardSession, Transport,
};

pub const CVC: &[u8] = b"123456";

/// Set up test logging: LOG_LEVEL env or debug
pub fn init_logging() {
    let level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };
    let _ = SimpleLogger::init(level, simplelog::Config::default());
}

/// Initial lifecycle stage for one soft-card slot
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotInit {
    Unused,
    Sealed,
    Unsealed,
}

/// Soft card construction options
#[derive(Clone, Debug)]
pub struct Options {
    pub tapsigner: bool,
    pub testnet: bool,
    pub cvc: Vec<u8>,
    pub slots: Vec<SlotInit>,
    pub proto_version: u64,
    /// First status response omits the nonce
    pub omit_first_nonce: bool,
    /// Payment key unrelated to the disclosed master key / chain code
    pub lie_about_slot_key: bool,
    /// Corrupt the first certificate chain signature
    pub break_cert_chain: bool,
    /// `check` signs the wrong message
    pub bad_check_sig: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tapsigner: false,
            testnet: false,
            cvc: CVC.to_vec(),
            slots: vec![SlotInit::Sealed],
            proto_version: 1,
            omit_first_nonce: false,
            lie_about_slot_key: false,
            break_cert_chain: false,
            bad_check_sig: false,
        }
    }
}

struct Slot {
    master: SigningKey,
    chain_code: [u8; 32],
    payment: SigningKey,
    state: SlotInit,
}

impl Slot {
    fn new(state: SlotInit, lie: bool) -> Self {
        let master = SigningKey::random(&mut OsRng);
        let mut chain_code = [0u8; 32];
        OsRng.fill_bytes(&mut chain_code);

        let payment = match lie {
            false => ckd_child0(&master, &chain_code),
            true => SigningKey::random(&mut OsRng),
        };

        Self {
            master,
            chain_code,
            payment,
            state,
        }
    }
}

struct State {
    opts: Options,
    key: SigningKey,
    root: SigningKey,
    cert_chain: Vec<Vec<u8>>,
    nonce: [u8; 16],
    active: u8,
    cvc: Vec<u8>,
    slots: Vec<Slot>,
    // TAPSIGNER side
    path: Option<Vec<u32>>,
    ts_chain: [u8; 32],
    num_backups: u64,
    first_status: bool,
    force_sw: Option<u16>,
    // observability for assertions
    wire: Vec<(String, Vec<u8>)>,
    session_keys: Vec<[u8; 32]>,
}

/// In-memory card speaking the real protocol over [Transport]
pub struct SoftCard {
    state: Mutex<State>,
}

impl SoftCard {
    pub fn new(opts: Options) -> Self {
        let key = SigningKey::random(&mut OsRng);
        let batch = SigningKey::random(&mut OsRng);
        let root = SigningKey::random(&mut OsRng);

        // chain: batch attests the card key, root attests the batch key
        let mut sig1 = rec_sign(&batch, &Sha256::digest(pubkey_bytes(&key)));
        let sig2 = rec_sign(&root, &Sha256::digest(pubkey_bytes(&batch)));
        if opts.break_cert_chain {
            // zero r: structurally invalid
            sig1[1..33].fill(0);
        }

        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);
        let mut ts_chain = [0u8; 32];
        OsRng.fill_bytes(&mut ts_chain);

        let slots = opts
            .slots
            .iter()
            .map(|s| Slot::new(*s, opts.lie_about_slot_key))
            .collect::<Vec<_>>();
        // active slot: first not-yet-spent one
        let active = slots
            .iter()
            .position(|s| s.state != SlotInit::Unsealed)
            .unwrap_or(slots.len().saturating_sub(1)) as u8;

        Self {
            state: Mutex::new(State {
                cvc: opts.cvc.clone(),
                opts,
                key,
                root,
                cert_chain: vec![sig1, sig2],
                nonce,
                active,
                slots,
                path: Some(vec![0x8000_0054, 0x8000_0000, 0x8000_0000]),
                ts_chain,
                num_backups: 0,
                first_status: true,
                force_sw: None,
                wire: Vec::new(),
                session_keys: Vec::new(),
            }),
        }
    }

    // ---- observability / fault injection ----

    pub fn factory_root(&self) -> Vec<u8> {
        pubkey_bytes(&self.state.lock().unwrap().root)
    }

    pub fn card_pubkey(&self) -> Vec<u8> {
        pubkey_bytes(&self.state.lock().unwrap().key)
    }

    pub fn current_nonce(&self) -> Vec<u8> {
        self.state.lock().unwrap().nonce.to_vec()
    }

    /// Address the slot's payment key should produce
    pub fn expected_addr(&self, slot: usize) -> String {
        let st = self.state.lock().unwrap();
        slot_addr(&st, slot)
    }

    pub fn master_pubkey(&self) -> Vec<u8> {
        pubkey_bytes(&self.state.lock().unwrap().key)
    }

    /// How many commands with this wire name were received
    pub fn count_cmd(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .wire
            .iter()
            .filter(|(cmd, _)| cmd == name)
            .count()
    }

    /// True when any received argument map contains `needle` as a subslice
    pub fn wire_contains(&self, needle: &[u8]) -> bool {
        self.state
            .lock()
            .unwrap()
            .wire
            .iter()
            .any(|(_, raw)| raw.windows(needle.len()).any(|w| w == needle))
    }

    /// Session keys derived card-side, in order of arrival
    pub fn session_keys(&self) -> Vec<[u8; 32]> {
        self.state.lock().unwrap().session_keys.clone()
    }

    /// Answer the next command with this raw status word and no body
    pub fn force_status_word(&self, sw: u16) {
        self.state.lock().unwrap().force_sw = Some(sw);
    }

    fn handle(&self, cmd: Command, args: Dict) -> anyhow::Result<(u16, Dict)> {
        let mut st = self.state.lock().unwrap();
        st.wire.push((cmd.name().to_owned(), args.to_cbor()?));

        if let Some(sw) = st.force_sw.take() {
            return Ok((sw, Dict::new()));
        }

        let resp = dispatch(&mut st, cmd, &args);
        Ok((SW_OKAY, resp))
    }
}

#[async_trait]
impl Transport for SoftCard {
    async fn send(&self, cmd: Command, args: Dict) -> anyhow::Result<(u16, Dict)> {
        self.handle(cmd, args)
    }
}

/// Build a card and open a session on it
pub async fn setup(opts: Options) -> (Arc<SoftCard>, CardSession<Arc<SoftCard>>) {
    init_logging();
    let card = Arc::new(SoftCard::new(opts));
    let session = CardSession::first_look(card.clone())
        .await
        .expect("first_look failed");
    (card, session)
}

pub async fn satscard() -> (Arc<SoftCard>, CardSession<Arc<SoftCard>>) {
    setup(Options::default()).await
}

pub async fn tapsigner() -> (Arc<SoftCard>, CardSession<Arc<SoftCard>>) {
    setup(Options {
        tapsigner: true,
        slots: vec![],
        ..Options::default()
    })
    .await
}

// ---- card behaviour ----

fn dispatch(st: &mut State, cmd: Command, args: &Dict) -> Dict {
    match cmd {
        Command::Status => status(st),
        Command::Certs => {
            let mut d = Dict::new();
            d.insert(
                "cert_chain",
                Value::Array(
                    st.cert_chain
                        .iter()
                        .map(|s| Value::Bytes(s.clone()))
                        .collect(),
                ),
            );
            d
        }
        Command::Check => check(st, args),
        Command::Read => read(st, args),
        Command::Derive => derive(st, args),
        Command::Dump => dump(st, args),
        Command::Unseal => unseal(st, args),
        Command::Xpub => xpub(st, args),
        Command::Backup => backup(st),
        Command::Change => change(st, args),
        Command::Nfc => Dict::new().with_text("url", "example.com/started#t=1"),
        Command::Sign => err(ErrorCode::InvalidCommand, "not supported"),
    }
}

fn status(st: &mut State) -> Dict {
    let mut d = Dict::new()
        .with_uint("proto", st.opts.proto_version)
        .with_text("ver", "1.0.0")
        .with_uint("birth", 700_001)
        .with_bytes("pubkey", pubkey_bytes(&st.key));

    if !(st.opts.omit_first_nonce && st.first_status) {
        d.insert_bytes("card_nonce", st.nonce.to_vec());
    }
    st.first_status = false;

    if st.opts.testnet {
        d.insert_bool("testnet", true);
    }

    if st.opts.tapsigner {
        d.insert_bool("tapsigner", true);
        d.insert_uint("num_backups", st.num_backups);
        if let Some(path) = &st.path {
            let parts = path
                .iter()
                .map(|c| Value::Integer(*c as i128))
                .collect();
            d.insert("path", Value::Array(parts));
        }
    } else {
        d.insert(
            "slots",
            Value::Array(vec![
                Value::Integer(st.active as i128),
                Value::Integer(st.slots.len() as i128),
            ]),
        );
        let active = st.active as usize;
        if st.slots.get(active).map(|s| s.state) == Some(SlotInit::Sealed) {
            let addr = slot_addr(st, active);
            d.insert_text("addr", partial_addr(&addr));
        }
    }

    d
}

fn check(st: &mut State, args: &Dict) -> Dict {
    let user = match args.bytes("nonce") {
        Some(n) if n.len() == 16 => n.to_vec(),
        Some(_) => return err(ErrorCode::BadArguments, "bad nonce length"),
        None => return err(ErrorCode::BadArguments, "missing nonce"),
    };
    if user.iter().all(|b| *b == user[0]) {
        return err(ErrorCode::WeakNonce, "nonce too weak");
    }

    let mut msg = match st.opts.bad_check_sig {
        false => b"OPENDIME".to_vec(),
        true => b"OPENMIND".to_vec(),
    };
    msg.extend_from_slice(&st.nonce);
    msg.extend_from_slice(&user);

    let auth_sig = sign(&st.key, &Sha256::digest(&msg));
    with_rotated_nonce(st, Dict::new().with_bytes("auth_sig", auth_sig))
}

fn read(st: &mut State, args: &Dict) -> Dict {
    let user = match args.bytes("nonce") {
        Some(n) if n.len() == 16 => n.to_vec(),
        _ => return err(ErrorCode::BadArguments, "missing nonce"),
    };

    let active = st.active as usize;
    let slot = match st.slots.get(active) {
        Some(s) if s.state != SlotInit::Unused => s,
        _ => return err(ErrorCode::InvalidState, "slot not used"),
    };

    let mut msg = b"OPENDIME".to_vec();
    msg.extend_from_slice(&st.nonce);
    msg.extend_from_slice(&user);
    msg.push(st.active);

    let sig = sign(&slot.payment, &Sha256::digest(&msg));
    let pubkey = pubkey_bytes(&slot.payment);
    with_rotated_nonce(
        st,
        Dict::new().with_bytes("sig", sig).with_bytes("pubkey", pubkey),
    )
}

fn derive(st: &mut State, args: &Dict) -> Dict {
    if st.opts.tapsigner {
        // derivation change: authenticated
        match check_auth(st, Command::Derive, args) {
            Ok(Some(_)) => (),
            Ok(None) => return err(ErrorCode::NeedsAuth, "auth required"),
            Err(e) => return e,
        }
        let path = match args.path("path") {
            Some(p) => p,
            None => return err(ErrorCode::BadArguments, "missing path"),
        };
        st.path = Some(path);

        let chain = st.ts_chain.to_vec();
        let pubkey = pubkey_bytes(&st.key);
        return with_rotated_nonce(
            st,
            Dict::new()
                .with_bytes("chain_code", chain)
                .with_bytes("pubkey", pubkey),
        );
    }

    // SATSCARD: master key disclosure for the active slot
    let user = match args.bytes("nonce") {
        Some(n) if n.len() == 16 => n.to_vec(),
        _ => return err(ErrorCode::BadArguments, "missing nonce"),
    };
    let active = st.active as usize;
    let slot = match st.slots.get(active) {
        Some(s) if s.state != SlotInit::Unused => s,
        _ => return err(ErrorCode::InvalidState, "slot not used"),
    };

    let mut msg = b"OPENDIME".to_vec();
    msg.extend_from_slice(&st.nonce);
    msg.extend_from_slice(&user);
    msg.extend_from_slice(&slot.chain_code);

    let sig = sign(&slot.master, &Sha256::digest(&msg));
    let chain_code = slot.chain_code.to_vec();
    let master_pubkey = pubkey_bytes(&slot.master);
    with_rotated_nonce(
        st,
        Dict::new()
            .with_bytes("sig", sig)
            .with_bytes("chain_code", chain_code)
            .with_bytes("master_pubkey", master_pubkey),
    )
}

fn dump(st: &mut State, args: &Dict) -> Dict {
    let idx = match args.uint("slot") {
        Some(i) if (i as usize) < st.slots.len() => i as usize,
        _ => return err(ErrorCode::BadArguments, "bad slot"),
    };

    let session = match check_auth(st, Command::Dump, args) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let slot = &st.slots[idx];
    let mut d = Dict::new().with_uint("slot", idx as u64);
    match slot.state {
        SlotInit::Unused => d.insert_bool("used", false),
        SlotInit::Sealed => d.insert_bool("sealed", true),
        SlotInit::Unsealed => {
            d.insert_bool("sealed", false);
            d.insert_text("addr", slot_addr(st, idx));
            if let Some(key) = &session {
                let slot = &st.slots[idx];
                let privkey = slot.payment.to_bytes();
                d.insert_bytes("privkey", xor(key, privkey.as_slice()));
                d.insert_bytes("chain_code", slot.chain_code.to_vec());
                d.insert_bytes("master_pubkey", pubkey_bytes(&slot.master));
            }
        }
    }

    // an authenticated dump consumed the nonce
    match session {
        Some(_) => with_rotated_nonce(st, d),
        None => d,
    }
}

fn unseal(st: &mut State, args: &Dict) -> Dict {
    let session = match check_auth(st, Command::Unseal, args) {
        Ok(Some(s)) => s,
        Ok(None) => return err(ErrorCode::NeedsAuth, "auth required"),
        Err(e) => return e,
    };

    let idx = st.active as usize;
    let resp = match st.slots[idx].state {
        SlotInit::Sealed => {
            st.slots[idx].state = SlotInit::Unsealed;
            let slot = &st.slots[idx];
            let privkey = slot.payment.to_bytes();
            Dict::new()
                .with_uint("slot", idx as u64)
                .with_bytes("privkey", xor(&session, privkey.as_slice()))
                .with_bytes("pubkey", pubkey_bytes(&slot.payment))
                .with_bytes("master_pk", pubkey_bytes(&slot.master))
                .with_bytes("chain_code", slot.chain_code.to_vec())
        }
        SlotInit::Unsealed => err(ErrorCode::InvalidState, "already unsealed"),
        SlotInit::Unused => err(ErrorCode::InvalidState, "slot not used"),
    };

    // auth consumed the nonce either way
    with_rotated_nonce(st, resp)
}

fn xpub(st: &mut State, args: &Dict) -> Dict {
    if !st.opts.tapsigner {
        return err(ErrorCode::InvalidCommand, "wrong card variant");
    }
    match check_auth(st, Command::Xpub, args) {
        Ok(Some(_)) => (),
        Ok(None) => return err(ErrorCode::NeedsAuth, "auth required"),
        Err(e) => return e,
    }

    let master = args.boolean("master").unwrap_or(false);
    let depth: u8 = match master {
        true => 0,
        false => st.path.as_ref().map(|p| p.len() as u8).unwrap_or(0),
    };

    let mut xpub = Vec::with_capacity(78);
    let version: u32 = match st.opts.testnet {
        false => 0x0488_B21E,
        true => 0x0435_87CF,
    };
    xpub.extend_from_slice(&version.to_be_bytes());
    xpub.push(depth);
    xpub.extend_from_slice(&[0u8; 4]); // parent fingerprint
    xpub.extend_from_slice(&[0u8; 4]); // child number
    xpub.extend_from_slice(&st.ts_chain);
    xpub.extend_from_slice(&pubkey_bytes(&st.key));

    with_rotated_nonce(st, Dict::new().with_bytes("xpub", xpub))
}

fn backup(st: &mut State) -> Dict {
    if !st.opts.tapsigner {
        return err(ErrorCode::InvalidCommand, "wrong card variant");
    }
    st.num_backups += 1;
    let mut data = vec![0u8; 100];
    OsRng.fill_bytes(&mut data);
    with_rotated_nonce(st, Dict::new().with_bytes("data", data))
}

fn change(st: &mut State, args: &Dict) -> Dict {
    let session = match check_auth(st, Command::Change, args) {
        Ok(Some(s)) => s,
        Ok(None) => return err(ErrorCode::NeedsAuth, "auth required"),
        Err(e) => return e,
    };

    let masked = match args.bytes("data") {
        Some(d) => d.to_vec(),
        None => return err(ErrorCode::BadArguments, "missing data"),
    };
    let new_cvc = xor(&session, &masked);
    if new_cvc.len() < 6 || new_cvc.len() > 32 {
        return with_rotated_nonce(st, err(ErrorCode::BadArguments, "bad cvc length"));
    }

    st.cvc = new_cvc;
    with_rotated_nonce(st, Dict::new().with_bool("success", true))
}

/// Verify auth fields when present; on a wrong CVC the nonce still burns
fn check_auth(st: &mut State, cmd: Command, args: &Dict) -> Result<Option<[u8; 32]>, Dict> {
    let epubkey = match args.bytes("epubkey") {
        Some(e) => e.to_vec(),
        None => return Ok(None),
    };
    let xcvc = match args.bytes("xcvc") {
        Some(x) => x.to_vec(),
        None => return Err(err(ErrorCode::BadArguments, "missing xcvc")),
    };

    let session = ecdh(&st.key, &epubkey);
    let md = Sha256::new()
        .chain_update(st.nonce)
        .chain_update(cmd.name().as_bytes())
        .finalize();
    let cvc: Vec<u8> = xcvc
        .iter()
        .zip(session.iter().zip(md.iter()))
        .map(|(x, (k, m))| x ^ k ^ m)
        .collect();

    st.session_keys.push(session);

    if cvc != st.cvc {
        return Err(with_rotated_nonce(st, err(ErrorCode::BadAuth, "bad auth")));
    }
    Ok(Some(session))
}

// ---- small pieces ----

fn err(code: ErrorCode, msg: &str) -> Dict {
    Dict::new()
        .with_text("error", msg)
        .with_uint("code", u16::from(code) as u64)
}

fn with_rotated_nonce(st: &mut State, mut d: Dict) -> Dict {
    OsRng.fill_bytes(&mut st.nonce);
    d.insert_bytes("card_nonce", st.nonce.to_vec());
    d
}

fn pubkey_bytes(key: &SigningKey) -> Vec<u8> {
    key.verifying_key().to_encoded_point(true).as_bytes().to_vec()
}

fn sign(key: &SigningKey, digest: &[u8]) -> Vec<u8> {
    let sig: Signature = key.sign_prehash(digest).expect("sign");
    sig.to_bytes().to_vec()
}

fn rec_sign(key: &SigningKey, digest: &[u8]) -> Vec<u8> {
    let (sig, rec_id) = key.sign_prehash_recoverable(digest).expect("sign");
    let mut out = vec![27 + rec_id.to_byte()];
    out.extend_from_slice(&sig.to_bytes());
    out
}

fn ecdh(card: &SigningKey, epubkey: &[u8]) -> [u8; 32] {
    let pk = PublicKey::from_sec1_bytes(epubkey).expect("epubkey");
    let scalar: Scalar = **card.as_nonzero_scalar();
    let point = (pk.to_projective() * scalar).to_affine().to_encoded_point(true);
    Sha256::digest(point.as_bytes()).into()
}

fn ckd_child0(master: &SigningKey, chain_code: &[u8; 32]) -> SigningKey {
    let mut mac = Hmac::<Sha512>::new_from_slice(chain_code).expect("hmac");
    mac.update(master.verifying_key().to_encoded_point(true).as_bytes());
    mac.update(&0u32.to_be_bytes());
    let i = mac.finalize().into_bytes();

    let il: [u8; 32] = i[..32].try_into().expect("hmac width");
    let tweak = Option::<Scalar>::from(Scalar::from_repr(il.into())).expect("tweak");
    let child = tweak + **master.as_nonzero_scalar();
    SigningKey::from_bytes(&child.to_bytes()).expect("child key")
}

fn xor(key: &[u8; 32], data: &[u8]) -> Vec<u8> {
    data.iter().zip(key.iter()).map(|(d, k)| d ^ k).collect()
}

fn slot_addr(st: &State, slot: usize) -> String {
    let pubkey = pubkey_bytes(&st.slots[slot].payment);
    verify::render_address(&pubkey, st.opts.testnet).expect("render")
}

fn partial_addr(addr: &str) -> String {
    format!("{}___{}", &addr[..12], &addr[addr.len() - 12..])
}
