use crate::cipher::{MasterKey, SessionCipher, TAG_SIZE, random_salt};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// Largest plaintext carried by one chunk.
pub const MAX_PAYLOAD_SIZE: usize = 0x3FFF;

const LENGTH_SIZE: usize = 2;

enum DecodeState {
    Salt,
    Length,
    Payload(usize),
}

/// Chunked AEAD stream framing.
///
/// Each direction starts with its own salt (as long as the cipher's key),
/// followed by chunks of `[AEAD(len)][AEAD(payload)]`.
pub struct AeadCodec {
    master: MasterKey,
    state: DecodeState,
    opener: Option<SessionCipher>,
    sealer: Option<SessionCipher>,
}

impl AeadCodec {
    pub fn new(master: MasterKey) -> Self {
        Self {
            master,
            state: DecodeState::Salt,
            opener: None,
            sealer: None,
        }
    }

    fn opener(&mut self) -> io::Result<&mut SessionCipher> {
        self.opener
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing session salt"))
    }
}

impl Decoder for AeadCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Salt => {
                    let salt_size = self.master.kind().salt_size();
                    if src.len() < salt_size {
                        src.reserve(salt_size - src.len());
                        return Ok(None);
                    }
                    let salt = src.split_to(salt_size);
                    self.opener = Some(self.master.session(&salt)?);
                    self.state = DecodeState::Length;
                }
                DecodeState::Length => {
                    if src.len() < LENGTH_SIZE + TAG_SIZE {
                        return Ok(None);
                    }
                    let sealed = src.split_to(LENGTH_SIZE + TAG_SIZE);
                    let plain = self.opener()?.open(&sealed)?;
                    let len = u16::from_be_bytes([plain[0], plain[1]]) as usize;
                    if len == 0 || len > MAX_PAYLOAD_SIZE {
                        debug!("Rejecting chunk of {} bytes", len);
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("invalid chunk length {}", len),
                        ));
                    }
                    src.reserve(len + TAG_SIZE);
                    self.state = DecodeState::Payload(len);
                }
                DecodeState::Payload(len) => {
                    if src.len() < len + TAG_SIZE {
                        return Ok(None);
                    }
                    let sealed = src.split_to(len + TAG_SIZE);
                    let plain = self.opener()?.open(&sealed)?;
                    self.state = DecodeState::Length;
                    return Ok(Some(Bytes::from(plain)));
                }
            }
        }
    }
}

impl Encoder<Bytes> for AeadCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.sealer.is_none() {
            let salt = random_salt(self.master.kind());
            dst.put_slice(&salt);
            self.sealer = Some(self.master.session(&salt)?);
        }
        let Some(sealer) = self.sealer.as_mut() else {
            return Ok(());
        };

        for chunk in item.chunks(MAX_PAYLOAD_SIZE) {
            let len = (chunk.len() as u16).to_be_bytes();
            let sealed_len = sealer.seal(&len)?;
            let sealed_payload = sealer.seal(chunk)?;
            dst.reserve(sealed_len.len() + sealed_payload.len());
            dst.put_slice(&sealed_len);
            dst.put_slice(&sealed_payload);
        }
        Ok(())
    }
}
