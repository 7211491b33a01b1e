/// Size of the fixed header prefixed to every compiled-code artifact.
pub const HEADER_LEN: usize = 16;

/// The invalidation key is a source hash rather than `(mtime, size)`.
pub const FLAG_HASH_BASED: u32 = 0b01;
/// Hash-based artifacts are checked against the source on load.
pub const FLAG_CHECK_SOURCE: u32 = 0b10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidationKey {
    Timestamp { mtime: u32, size: u32 },
    Hash([u8; 8]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheHeader {
    pub magic: [u8; 4],
    pub flags: u32,
    pub key: InvalidationKey,
}

impl CacheHeader {
    pub fn timestamp(magic: [u8; 4], mtime: i64, size: u64) -> Self {
        // Both fields are stored modulo 2^32.
        Self {
            magic,
            flags: 0,
            key: InvalidationKey::Timestamp {
                mtime: mtime as u32,
                size: size as u32,
            },
        }
    }

    pub fn hash(magic: [u8; 4], hash: [u8; 8]) -> Self {
        Self {
            magic,
            flags: FLAG_HASH_BASED | FLAG_CHECK_SOURCE,
            key: InvalidationKey::Hash(hash),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0_u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.flags.to_le_bytes());
        match self.key {
            InvalidationKey::Timestamp { mtime, size } => {
                out[8..12].copy_from_slice(&mtime.to_le_bytes());
                out[12..16].copy_from_slice(&size.to_le_bytes());
            }
            InvalidationKey::Hash(hash) => out[8..16].copy_from_slice(&hash),
        }
        out
    }

    /// Parse the first [`HEADER_LEN`] bytes of `bytes`. Returns `None` if there are fewer.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header: &[u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;
        let magic = [header[0], header[1], header[2], header[3]];
        let flags = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let key = if flags & FLAG_HASH_BASED != 0 {
            let mut hash = [0_u8; 8];
            hash.copy_from_slice(&header[8..16]);
            InvalidationKey::Hash(hash)
        } else {
            InvalidationKey::Timestamp {
                mtime: u32::from_le_bytes([header[8], header[9], header[10], header[11]]),
                size: u32::from_le_bytes([header[12], header[13], header[14], header[15]]),
            }
        };
        Some(Self { magic, flags, key })
    }
}

/// Split a precompiled artifact into its header and code payload.
///
/// Only the magic number is checked: precompiled entries ship without source, so there is
/// nothing to validate the invalidation key against.
pub fn split_artifact(bytes: &[u8], expected_magic: [u8; 4]) -> Result<(CacheHeader, &[u8]), Vec<u8>> {
    match CacheHeader::parse(bytes) {
        Some(header) if header.magic == expected_magic => Ok((header, &bytes[HEADER_LEN..])),
        _ => Err(bytes.iter().take(4).copied().collect()),
    }
}
