use std::fmt;

use crate::instrument::{OUTPUT_COUNT_WORD, OUTPUT_TAG_WORD};

/// Stable identifier reported for out-of-bounds descriptor indexing.
pub const VUID_DESCRIPTOR_INDEX_OOB: &str = "GPUAV-descriptor-index-oob";

/// Decoded contents of one debug output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRecord {
    /// Number of out-of-bounds accesses observed.
    pub count: u32,
    pub shader_id: u16,
    /// Zero-based index of the instrumented access in its shader.
    pub site: u16,
}

impl OutputRecord {
    /// `None` when nothing was recorded.
    pub fn decode(words: &[u32]) -> Option<Self> {
        let count = *words.get(OUTPUT_COUNT_WORD)?;
        if count == 0 {
            return None;
        }
        let tag = words.get(OUTPUT_TAG_WORD).copied().unwrap_or(0);
        Some(Self {
            count,
            shader_id: (tag >> 16) as u16,
            site: ((tag & 0xffff) as u16).saturating_sub(1),
        })
    }
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} descriptor array access(es) out of bounds; last reported by shader 0x{:04x} at access #{}",
            self.count, self.shader_id, self.site
        )
    }
}
