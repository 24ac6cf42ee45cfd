//! Channel admission: a fixed-size version frame followed by an acknowledgement.

use bytes::{Buf, BufMut, BytesMut};
use kestrel_net_primitives::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encoded size of a [`Version`] frame.
pub(crate) const VERSION_SIZE: usize = 4 + 8 + 8 + 1;

/// Acknowledgement sent once the peer's version is accepted.
pub(crate) const VERACK: [u8; 4] = *b"vack";

/// What each side announces when a channel opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Version {
    pub(crate) magic: u32,
    pub(crate) nonce: u64,
    pub(crate) height: u64,
    pub(crate) relay: bool,
}

impl Version {
    pub(crate) fn encode(&self) -> BytesMut {
        let mut frame = BytesMut::with_capacity(VERSION_SIZE);
        frame.put_u32_le(self.magic);
        frame.put_u64_le(self.nonce);
        frame.put_u64_le(self.height);
        frame.put_u8(u8::from(self.relay));
        frame
    }

    pub(crate) fn decode(mut frame: &[u8]) -> Result<Self> {
        if frame.len() != VERSION_SIZE {
            return Err(Error::BadStream);
        }

        let magic = frame.get_u32_le();
        let nonce = frame.get_u64_le();
        let height = frame.get_u64_le();
        let relay = match frame.get_u8() {
            0 => false,
            1 => true,
            _ => return Err(Error::BadStream),
        };
        Ok(Self {
            magic,
            nonce,
            height,
            relay,
        })
    }
}

/// Runs the admission exchange over `stream` and returns the peer's version.
///
/// `accept` vets the peer's version before it is acknowledged. A frame for another
/// network fails with [`Error::BadStream`].
pub(crate) async fn exchange<S>(
    stream: &mut S,
    local: &Version,
    accept: impl FnOnce(&Version) -> Result<()>,
) -> Result<Version>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&local.encode()).await?;

    let mut frame = [0u8; VERSION_SIZE];
    stream.read_exact(&mut frame).await?;
    let peer = Version::decode(&frame)?;
    if peer.magic != local.magic {
        return Err(Error::BadStream);
    }
    accept(&peer)?;

    stream.write_all(&VERACK).await?;
    stream.flush().await?;

    let mut ack = [0u8; VERACK.len()];
    stream.read_exact(&mut ack).await?;
    if ack != VERACK {
        return Err(Error::BadStream);
    }

    Ok(peer)
}
