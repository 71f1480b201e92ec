use bytes::Bytes;

/// A packet handed to the shaper by the classifier.
///
/// The shaper never looks inside the payload; it only accounts for its size.
/// Classification happens upstream and arrives as a separate [`FiveTuple`](crate::FiveTuple).
#[derive(Debug, Clone)]
pub struct Packet {
    payload: Bytes,
}

impl Packet {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// A zero-filled packet of the given size. Handy for tests and probes.
    pub fn zeroed(len: usize) -> Self {
        Self { payload: Bytes::from(vec![0u8; len]) }
    }

    /// Payload size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload size in bits, as consumed from bandwidth credit.
    #[inline]
    pub fn len_bits(&self) -> u64 {
        self.payload.len() as u64 * 8
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl From<Bytes> for Packet {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}
