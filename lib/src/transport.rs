//! Transport abstraction for card communication
//!
// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::sync::Arc;

use async_trait::async_trait;

use tapcard_proto::{Command, Dict};

/// One byte-oriented card connection.
///
/// Implementations own framing (NFC / APDU wrapping, reader selection) and
/// the CBOR codec boundary; the engine hands over a command plus its
/// argument map and expects the raw status word and decoded result map
/// back. A non-success status word must still yield a best-effort result
/// map.
///
/// One call is one card round trip: no retries, no internal timeouts.
#[async_trait]
pub trait Transport {
    async fn send(&self, cmd: Command, args: Dict) -> anyhow::Result<(u16, Dict)>;
}

/// Shared ownership of a transport forwards each call to the inner value, so a
/// single card connection can be held behind an `Arc` while a session owns it.
#[async_trait]
impl<T: Transport + Send + Sync + ?Sized> Transport for Arc<T> {
    async fn send(&self, cmd: Command, args: Dict) -> anyhow::Result<(u16, Dict)> {
        (**self).send(cmd, args).await
    }
}
