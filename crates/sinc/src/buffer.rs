use bytes::BufMut;
use prost::Message;

/// A growable packet buffer.
///
/// Carries encoded outgoing commands, the connection's receive window, and
/// de-encapsulated packet bodies. Appending goes through the one byte-sink
/// capability the codec needs, [`BufMut`], with `Vec<u8>` as its only
/// implementation. The two side-channel fields are only meaningful when a
/// multi-device aggregator re-emits buffers on behalf of subordinate
/// devices; a plain connection leaves them at zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SincBuffer {
    data: Vec<u8>,
    /// Which aggregated device this buffer came from.
    pub device_id: i32,
    /// Offset applied to channel ids decoded out of this buffer.
    pub channel_id_offset: i32,
}

impl SincBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity), device_id: 0, channel_id_offset: 0 }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, device_id: 0, channel_id_offset: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    /// Append a protobuf message body. `Vec<u8>` grows on demand, so this is
    /// the one place encoding cannot fail short of allocation exhaustion.
    #[inline]
    pub fn append_message(&mut self, msg: &impl Message) {
        msg.encode(&mut self.data).expect("encoding into a growable buffer cannot fail");
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Remove `count` bytes from the front.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        self.data.drain(..count);
    }

    #[inline]
    pub(crate) fn vec_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}
