/// A stable document identifier derived from a document's relative path.
///
/// Uses FNV-1a so ids survive toolchain upgrades; chunk ids are built from
/// it and stored in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    pub numeric: u64,
    /// Hex form used in chunk ids (e.g. "a1b2c3d4e5f6").
    pub short: String,
}

const SHORT_LEN: usize = 12;

impl DocumentId {
    pub fn new(relative_path: &str) -> Self {
        let numeric = fnv1a(relative_path.as_bytes());
        let short = format!("{numeric:016x}")[..SHORT_LEN].to_string();
        Self { numeric, short }
    }

    /// Id of the chunk at position `order` within this document.
    pub fn chunk_id(&self, order: u32) -> String {
        format!("{}:{order}", self.short)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.short)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(DocumentId::new("notes/hello.md"), DocumentId::new("notes/hello.md"));
    }

    #[test]
    fn different_paths_differ() {
        let a = DocumentId::new("hello.md");
        let b = DocumentId::new("world.md");
        assert_ne!(a.numeric, b.numeric);
    }

    #[test]
    fn known_hash_is_stable() {
        // FNV-1a of the empty input is the offset basis.
        assert_eq!(DocumentId::new("").numeric, 0xcbf29ce484222325);
    }

    #[test]
    fn chunk_ids_carry_order() {
        let id = DocumentId::new("a.md");
        assert_eq!(id.short.len(), SHORT_LEN);
        assert_eq!(id.chunk_id(3), format!("{}:3", id.short));
        assert_eq!(id.to_string(), id.short);
    }
}
