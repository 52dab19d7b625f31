use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// SHA-256 of a shader's original bytecode.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of_words(words: &[u32]) -> Self {
        let mut hasher = Sha256::new();
        for word in words {
            hasher.update(word.to_le_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CachedShader {
    pub hash: ContentHash,
    /// Id stamped into the checks of this shader. Unique among live entries
    /// until 65535 entries have been created.
    pub shader_id: u16,
    /// Size of the original bytecode in bytes.
    pub original_size: usize,
    pub words: Arc<[u32]>,
    pub sites: u32,
}

struct CacheSlot {
    shader: CachedShader,
    users: usize,
}

/// Instrumented bytecode keyed by the content hash of the original.
///
/// Entries are counted per user (shader module or shader object) and
/// dropped when the last one releases them.
#[derive(Default)]
pub struct InstrumentationCache {
    entries: RwLock<HashMap<ContentHash, CacheSlot>>,
    runs: AtomicU64,
    next_id: AtomicU32,
}

impl InstrumentationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the instrumented form of `words`, running `instrument` only
    /// when no entry for the same bytecode exists. The pass receives the
    /// shader id of the new entry. Each successful call counts as one user
    /// of the entry.
    pub fn acquire<E>(
        &self,
        words: &[u32],
        instrument: impl FnOnce(&[u32], u16) -> Result<(Vec<u32>, u32), E>,
    ) -> Result<CachedShader, E> {
        let hash = ContentHash::of_words(words);
        // The write lock is held across the pass so the same bytecode is
        // never instrumented twice.
        match self.entries.write().entry(hash) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.users += 1;
                Ok(entry.shader.clone())
            }
            Entry::Vacant(entry) => {
                let shader_id = self.peek_id();
                let (instrumented, sites) = instrument(words, shader_id)?;
                self.runs.fetch_add(1, Ordering::Relaxed);
                self.next_id.fetch_add(1, Ordering::Relaxed);
                let shader = CachedShader {
                    hash,
                    shader_id,
                    original_size: words.len() * 4,
                    words: instrumented.into(),
                    sites,
                };
                entry.insert(CacheSlot {
                    shader: shader.clone(),
                    users: 1,
                });
                Ok(shader)
            }
        }
    }

    /// Ids start at 1 and skip 0 on wrap-around.
    fn peek_id(&self) -> u16 {
        let n = self.next_id.load(Ordering::Relaxed);
        (n % u32::from(u16::MAX)) as u16 + 1
    }

    /// Drop one user of `hash`. Returns true when the entry was evicted.
    pub fn release(&self, hash: ContentHash) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&hash) else {
            return false;
        };
        entry.users = entry.users.saturating_sub(1);
        if entry.users == 0 {
            entries.remove(&hash);
            true
        } else {
            false
        }
    }

    pub fn get(&self, hash: ContentHash) -> Option<CachedShader> {
        self.entries.read().get(&hash).map(|e| e.shader.clone())
    }

    pub fn users(&self, hash: ContentHash) -> usize {
        self.entries.read().get(&hash).map_or(0, |e| e.users)
    }

    /// How many times the instrumentation pass actually ran.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
