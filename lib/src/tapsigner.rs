// Copyright (c) 2022-2023 The MobileCoin Foundation

//! TAPSIGNER operations: derivation management, xpub export, backups

use tapcard_proto::{
    cmd::Command,
    dict::Dict,
    nonce::pick_nonce,
    path::{all_hardened, path_to_str, str_to_path},
};

use crate::{
    card::{want_bytes, CardSession},
    verify, Error, Transport,
};

impl<T: Transport> CardSession<T> {
    fn want_tapsigner(&self) -> Result<(), Error> {
        match self.ident().tapsigner {
            true => Ok(()),
            false => Err(Error::WrongVariant("TAPSIGNER")),
        }
    }

    /// Current derivation path; `None` before a key has been picked
    pub async fn get_derivation(&mut self) -> Result<Option<String>, Error> {
        self.want_tapsigner()?;
        let st = self.status().await?;
        Ok(st.path.map(|p| path_to_str(&p)))
    }

    /// Switch the derivation path; every component must be hardened.
    ///
    /// Returns the new path depth plus the chain code and pubkey the card
    /// reports at that path.
    // TODO: verify the reported chain code against the derive signature
    pub async fn set_derivation(
        &mut self,
        path: &str,
        cvc: &[u8],
    ) -> Result<(usize, Vec<u8>, Vec<u8>), Error> {
        self.want_tapsigner()?;

        let np = str_to_path(path)?;
        if !all_hardened(&np) {
            return Err(Error::PathNotHardened);
        }

        let nonce = pick_nonce();
        let (_, resp) = self
            .send_auth(
                Command::Derive,
                Some(cvc),
                Dict::new()
                    .with_path("path", &np)
                    .with_bytes("nonce", nonce.as_slice()),
            )
            .await?;

        let chain_code = want_bytes(Command::Derive, &resp, "chain_code")?.to_vec();
        let pubkey = want_bytes(Command::Derive, &resp, "pubkey")?.to_vec();
        Ok((np.len(), chain_code, pubkey))
    }

    /// Master key fingerprint: first four bytes of HASH160 of the master
    /// public key
    pub async fn get_xfp(&mut self, cvc: &[u8]) -> Result<[u8; 4], Error> {
        self.want_tapsigner()?;

        let (_, resp) = self
            .send_auth(
                Command::Xpub,
                Some(cvc),
                Dict::new().with_bool("master", true),
            )
            .await?;
        let xpub = want_bytes(Command::Xpub, &resp, "xpub")?;
        if xpub.len() < 33 {
            return Err(Error::InvalidKey("xpub"));
        }

        // the trailing 33 bytes of a BIP-32 serialization are the pubkey
        let h = verify::hash160(&xpub[xpub.len() - 33..]);
        Ok([h[0], h[1], h[2], h[3]])
    }

    /// Extended public key, master or at the current derivation, in
    /// base58check text form
    pub async fn get_xpub(&mut self, cvc: &[u8], master: bool) -> Result<String, Error> {
        self.want_tapsigner()?;

        let (_, resp) = self
            .send_auth(
                Command::Xpub,
                Some(cvc),
                Dict::new().with_bool("master", master),
            )
            .await?;
        let xpub = want_bytes(Command::Xpub, &resp, "xpub")?;
        Ok(bs58::encode(xpub).with_check().into_string())
    }

    /// Encrypted backup of the master secret (around 100 bytes, to be kept
    /// long term; the AES key is printed on the card back)
    pub async fn make_backup(&mut self, cvc: &[u8]) -> Result<Vec<u8>, Error> {
        self.want_tapsigner()?;

        let (_, resp) = self.send_auth(Command::Backup, Some(cvc), Dict::new()).await?;
        Ok(want_bytes(Command::Backup, &resp, "data")?.to_vec())
    }
}
