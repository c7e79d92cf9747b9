//! Symbol resolution results.

use std::collections::{BTreeMap, HashMap};

use crate::emulation::runtime::{RuntimeState, StubTable};

/// Where a symbol was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Exported by loaded image number `image`.
    Image {
        /// Index of the providing image in load order.
        image: usize,
        /// Absolute address.
        address: u64,
    },
    /// A host function reached through stub slot `index`.
    Stub {
        /// Stub slot.
        index: usize,
        /// Trampoline address.
        address: u64,
    },
    /// A data stub in the host data region.
    Data {
        /// Address of the data.
        address: u64,
    },
    /// An unresolved weak reference, bound to zero.
    Weak,
}

impl Resolution {
    /// The value a relocation against this symbol uses as `S`.
    #[must_use]
    pub fn address(&self) -> u64 {
        match *self {
            Resolution::Image { address, .. }
            | Resolution::Stub { address, .. }
            | Resolution::Data { address } => address,
            Resolution::Weak => 0,
        }
    }
}

/// Every symbol the linker resolved, keyed by name.
///
/// Built once while linking and immutable afterwards; `dlsym` answers from it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolutionTable {
    entries: BTreeMap<String, Resolution>,
}

impl ResolutionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the resolution of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Resolution> {
        self.entries.get(name)
    }

    /// Returns the address of `name`, or `None` if it is unknown or an
    /// unresolved weak reference.
    #[must_use]
    pub fn address(&self, name: &str) -> Option<u64> {
        match self.entries.get(name)? {
            Resolution::Weak => None,
            resolution => Some(resolution.address()),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Resolution)> {
        self.entries.iter().map(|(name, resolution)| (name.as_str(), resolution))
    }

    /// Records `name` unless it is already known. The first definition wins.
    pub(crate) fn insert(&mut self, name: &str, resolution: Resolution) {
        self.entries.entry(name.to_string()).or_insert(resolution);
    }
}

/// Host-provided symbols the linker falls back to after loaded images.
#[derive(Clone, Copy, Debug)]
pub struct HostSymbols<'a> {
    stubs: Option<&'a StubTable>,
    stub_base: u64,
    data: Option<&'a HashMap<String, u64>>,
}

impl<'a> HostSymbols<'a> {
    /// No host symbols: every import must come from a loaded image or be weak.
    #[must_use]
    pub fn none() -> Self {
        Self {
            stubs: None,
            stub_base: 0,
            data: None,
        }
    }

    /// The functions and data stubs a session's runtime installed.
    #[must_use]
    pub fn from_runtime(state: &'a RuntimeState) -> Self {
        Self {
            stubs: Some(state.stubs()),
            stub_base: state.layout().stub_base,
            data: Some(&state.layout().data),
        }
    }

    /// Resolves `name` against the host functions, then the data stubs.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Resolution> {
        if let Some(index) = self.stubs.and_then(|stubs| stubs.index_of(name)) {
            return Some(Resolution::Stub {
                index,
                address: StubTable::trampoline(self.stub_base, index),
            });
        }
        self.data
            .and_then(|data| data.get(name))
            .map(|&address| Resolution::Data { address })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_definition_wins() {
        let mut table = ResolutionTable::new();
        table.insert("f", Resolution::Image { image: 0, address: 0x1000 });
        table.insert("f", Resolution::Image { image: 1, address: 0x2000 });
        assert_eq!(table.address("f"), Some(0x1000));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_weak_has_no_address() {
        let mut table = ResolutionTable::new();
        table.insert("w", Resolution::Weak);
        assert_eq!(table.get("w"), Some(&Resolution::Weak));
        assert_eq!(table.address("w"), None);
        assert_eq!(Resolution::Weak.address(), 0);
        assert_eq!(table.address("missing"), None);
    }

    #[test]
    fn test_host_symbols_none() {
        assert_eq!(HostSymbols::none().resolve("malloc"), None);
    }
}
