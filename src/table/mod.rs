use std::collections::HashMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SymbolTableError {
    #[error("undefined name: {name}")]
    UndefinedName { name: String },
}

type Result<T> = std::result::Result<T, SymbolTableError>;

/// DJB2 over the name's bytes. The full 64-bit hash is the entry key; names
/// are never compared, so two names hashing alike alias the same slot.
fn djb2(name: &str) -> u64 {
    let mut key: u64 = 5381;
    for b in name.bytes() {
        key = key.wrapping_shl(5).wrapping_add(key).wrapping_add(b as u64);
    }
    key
}

/// Associative store with shadow-on-insert semantics: every `insert` for a
/// name pushes a new entry, `get` sees the most recent one, and `delete`
/// removes only the most recent one. The VM uses this for global bindings.
#[derive(Debug, Default)]
pub struct SymbolTable<V> {
    entries: HashMap<u64, Vec<V>>,
}

impl<V> SymbolTable<V> {
    pub fn new() -> Self {
        SymbolTable { entries: HashMap::new() }
    }

    /// Always succeeds. A same-named entry is shadowed, not overwritten.
    pub fn insert(&mut self, name: &str, value: V) {
        self.entries.entry(djb2(name)).or_default().push(value);
    }

    /// Most recently inserted value for `name`.
    pub fn get(&self, name: &str) -> Result<&V> {
        self.entries
            .get(&djb2(name))
            .and_then(|chain| chain.last())
            .ok_or_else(|| SymbolTableError::UndefinedName { name: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&djb2(name))
    }

    /// Removes the most recently inserted entry for `name`, exposing the one
    /// it shadowed (if any).
    pub fn delete(&mut self, name: &str) -> Result<V> {
        let key = djb2(name);
        let chain = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| SymbolTableError::UndefinedName { name: name.to_string() })?;

        // Non-empty by construction: emptied chains are removed below.
        let value = chain.pop().ok_or_else(|| SymbolTableError::UndefinedName {
            name: name.to_string(),
        })?;
        if chain.is_empty() {
            self.entries.remove(&key);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get() {
        let mut table = SymbolTable::new();
        table.insert("x", 1u64);
        assert_eq!(table.get("x"), Ok(&1));
    }

    #[test]
    fn redefinition_shadows() {
        let mut table = SymbolTable::new();
        table.insert("x", 1u64);
        table.insert("x", 2u64);
        assert_eq!(table.get("x"), Ok(&2));
    }

    #[test]
    fn delete_unshadows() {
        let mut table = SymbolTable::new();
        table.insert("x", 1u64);
        table.insert("x", 2u64);
        assert_eq!(table.delete("x"), Ok(2));
        assert_eq!(table.get("x"), Ok(&1));
    }

    #[test]
    fn delete_last_entry_removes_name() {
        let mut table = SymbolTable::new();
        table.insert("x", 1u64);
        table.delete("x").unwrap();
        assert!(!table.contains("x"));
        assert_eq!(
            table.get("x"),
            Err(SymbolTableError::UndefinedName { name: "x".to_string() })
        );
    }

    #[test]
    fn get_undefined_name_fails() {
        let table: SymbolTable<u64> = SymbolTable::new();
        assert_eq!(
            table.get("missing"),
            Err(SymbolTableError::UndefinedName { name: "missing".to_string() })
        );
    }

    #[test]
    fn delete_undefined_name_fails() {
        let mut table: SymbolTable<u64> = SymbolTable::new();
        assert!(table.delete("missing").is_err());
    }

    #[test]
    fn contains_scans_live_names_only() {
        let mut table = SymbolTable::new();
        table.insert("alpha", 1u64);
        table.insert("beta", 2u64);
        assert!(table.contains("alpha"));
        assert!(table.contains("beta"));
        assert!(!table.contains("gamma"));
    }

    #[test]
    fn djb2_reference_values() {
        // 5381 is the canonical empty-string accumulator.
        assert_eq!(djb2(""), 5381);
        assert_ne!(djb2("a"), djb2("b"));
    }
}
