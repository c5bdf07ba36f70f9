use std::collections::BTreeMap;

/// Converts a CamelCase logical name into the kernel's snake_case symbol.
///
/// Every uppercase ASCII letter after the first character gets a `_`
/// in front of it, then the whole name is lowercased. Digits never start a
/// new word, so `Nfs42Fallocate` becomes `nfs42_fallocate`.
pub fn to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 8);
    for (i, c) in name.chars().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Attach(String),
    /// The function does not exist on this kernel.
    Skip,
}

/// Maps logical hook names to the concrete symbol of the running kernel.
///
/// Names with no entry resolve to themselves.
#[derive(Clone, Debug)]
pub struct SymbolOverrideTable {
    entries: BTreeMap<String, Option<String>>,
}

impl Default for SymbolOverrideTable {
    fn default() -> Self {
        let mut table = Self {
            entries: BTreeMap::new(),
        };
        table.set("nfsd4_compound", Some("nfsd4_proc_compound"));
        table.set("nfsd4_null", Some("nfsd4_proc_null"));
        table.set("nfsd4_illegal", None);
        table
    }
}

impl SymbolOverrideTable {
    /// Built-in table extended with user-supplied entries. An empty target
    /// marks the symbol as absent.
    pub fn with_overrides(extra: &BTreeMap<String, String>) -> Self {
        let mut table = Self::default();
        for (logical, target) in extra {
            let target = target.trim();
            table.set(logical, (!target.is_empty()).then_some(target));
        }
        table
    }

    pub fn set(&mut self, logical: &str, target: Option<&str>) {
        self.entries
            .insert(logical.to_string(), target.map(str::to_string));
    }

    pub fn resolve(&self, logical: &str) -> Resolution {
        match self.entries.get(logical) {
            Some(Some(symbol)) => Resolution::Attach(symbol.clone()),
            Some(None) => Resolution::Skip,
            None => Resolution::Attach(logical.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_snake() {
        assert_eq!(to_snake("NfsFileMmap"), "nfs_file_mmap");
        assert_eq!(to_snake("Nfs4CopyFileRange"), "nfs4_copy_file_range");
        assert_eq!(to_snake("Nfs42RemapFileRange"), "nfs42_remap_file_range");
        assert_eq!(to_snake("NfsDAutomount"), "nfs_d_automount");
        assert_eq!(to_snake("nfs_lock"), "nfs_lock");
        assert_eq!(to_snake(""), "");
        assert_eq!(to_snake("X"), "x");
        assert_eq!(to_snake("NfsIO"), "nfs_i_o");
    }

    #[test]
    fn test_builtin_overrides() {
        let table = SymbolOverrideTable::default();
        assert_eq!(
            table.resolve("nfsd4_compound"),
            Resolution::Attach("nfsd4_proc_compound".into())
        );
        assert_eq!(
            table.resolve("nfsd4_null"),
            Resolution::Attach("nfsd4_proc_null".into())
        );
        assert_eq!(table.resolve("nfsd4_illegal"), Resolution::Skip);
        assert_eq!(
            table.resolve("nfsd4_read"),
            Resolution::Attach("nfsd4_read".into())
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let table = SymbolOverrideTable::default();
        for name in ["nfsd4_compound", "nfsd4_illegal", "rpc_execute", ""] {
            assert_eq!(table.resolve(name), table.resolve(name));
        }
    }

    #[test]
    fn test_configured_overrides_win() {
        let mut extra = BTreeMap::new();
        extra.insert("nfsd4_illegal".to_string(), "nfsd4_proc_illegal".to_string());
        extra.insert("nfsd4_clone".to_string(), "".to_string());

        let table = SymbolOverrideTable::with_overrides(&extra);
        assert_eq!(
            table.resolve("nfsd4_illegal"),
            Resolution::Attach("nfsd4_proc_illegal".into())
        );
        assert_eq!(table.resolve("nfsd4_clone"), Resolution::Skip);
        assert_eq!(
            table.resolve("nfsd4_compound"),
            Resolution::Attach("nfsd4_proc_compound".into())
        );
    }
}
