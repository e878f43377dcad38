//! Length-prefixed JSON framing (§4.1a). A thin `serde_json` layer over
//! `tokio_util`'s `LengthDelimitedCodec` so neither the broker nor the
//! client hand-roll byte counting.
//!
//! Parameterized over a decode item `D` and an encode item `E` so one
//! `Framed` can read one shape off the wire and write a different one —
//! the broker decodes `BrokerRequest` and encodes `BrokerResponse`; the
//! client does the reverse.

use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

pub struct JsonFrameCodec<D, E> {
    inner: LengthDelimitedCodec,
    _decode: PhantomData<D>,
    _encode: PhantomData<fn(E)>,
}

impl<D, E> Default for JsonFrameCodec<D, E> {
    fn default() -> Self {
        Self { inner: LengthDelimitedCodec::new(), _decode: PhantomData, _encode: PhantomData }
    }
}

impl<D: DeserializeOwned, E> Decoder for JsonFrameCodec<D, E> {
    type Item = D;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D>, FrameError> {
        let Some(frame) = self.inner.decode(src)? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&frame)?;
        Ok(Some(value))
    }
}

impl<D, E: Serialize> Encoder<E> for JsonFrameCodec<D, E> {
    type Error = FrameError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), FrameError> {
        let bytes = serde_json::to_vec(&item)?;
        let mut payload = BytesMut::with_capacity(bytes.len());
        payload.put_slice(&bytes);
        self.inner.encode(payload.freeze(), dst)?;
        Ok(())
    }
}
