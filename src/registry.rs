//! Variable registry: arena storage, name and canonical-key indices,
//! aliases, hierarchical auto-expansion.
//!
//! Ownership rules:
//! - Every variable lives exactly once in the arena; names and canonical
//!   keys hold `VarId` indices, never copies. Two names on the same cell
//!   resolve to the same arena slot.
//! - Declaring a word also declares its two byte children and their bit
//!   children (synthesized names), so a write at any level is visible at
//!   every level.
//! - One mutex guards the whole inner state; sync propagation runs inside
//!   the same critical section.

use std::collections::HashMap;

use log::warn;
use parking_lot::Mutex;

use crate::addr::{Address, Base, WordOrder};
use crate::decl::DeclEntry;
use crate::sync;
use crate::variable::{Value, VarType, Variable};

/// Stable arena index of a variable. Never invalidated by later
/// declarations; only a full reload resets the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) usize);

/// Read-only view of a variable's access-relevant attributes, taken under
/// the registry lock and used outside it.
#[derive(Clone, Debug)]
pub struct VarView {
    pub id: VarId,
    pub address: Address,
    pub var_type: VarType,
    pub read_only: bool,
    pub has_initial: bool,
}

#[derive(Default)]
pub(crate) struct RegistryInner {
    vars: Vec<Variable>,
    names: HashMap<String, VarId>,
    cells: HashMap<String, VarId>,
    alias_groups: HashMap<String, Vec<String>>,
}

impl RegistryInner {
    pub(crate) fn value_at(&self, key: &str) -> Option<Value> {
        let id = self.cells.get(key)?;
        self.vars[id.0].value
    }

    /// Store a value into the cell behind `key`. Undeclared cells are
    /// silently skipped: not every cell need exist.
    pub(crate) fn set_at(&mut self, key: &str, value: Value) {
        if let Some(&id) = self.cells.get(key) {
            self.vars[id.0].set_value(value);
        }
    }
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Ingest a batch of declaration entries. Entries whose address fails
    /// to parse are skipped with a diagnostic; ingestion continues. After
    /// the batch, every canonical key bound by more than one name is
    /// logged.
    pub fn declare(&self, entries: &[DeclEntry]) {
        let mut inner = self.inner.lock();
        for entry in entries {
            declare_entry(&mut inner, entry, false);
        }
        for (key, names) in &inner.alias_groups {
            if names.len() > 1 {
                warn!("alias detected: address {key} used by names {names:?}");
            }
        }
    }

    /// Ad hoc single-variable registration.
    pub fn register(&self, entry: &DeclEntry) {
        let mut inner = self.inner.lock();
        declare_entry(&mut inner, entry, false);
    }

    /// Drop everything and ingest `entries` from scratch (dynamic reload).
    pub fn reload(&self, entries: &[DeclEntry]) {
        {
            let mut inner = self.inner.lock();
            *inner = RegistryInner::default();
        }
        self.declare(entries);
    }

    /// Recompute the canonical index and alias groups from the current
    /// name bindings. Idempotent; variable identities are untouched.
    ///
    /// Declaration order of alias names lives only in the existing
    /// groups (the name map is unordered), so the groups are walked in
    /// place rather than rebuilt from the index.
    pub fn rebuild(&self) {
        let mut inner = self.inner.lock();
        let old_groups: Vec<Vec<String>> =
            inner.alias_groups.drain().map(|(_, names)| names).collect();
        inner.cells.clear();

        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for names in old_groups {
            for name in names {
                let Some(&id) = inner.names.get(&name) else {
                    continue;
                };
                let key = inner.vars[id.0].address.canonical_key();
                // First created variable keeps the canonical binding.
                let slot = inner.cells.entry(key.clone()).or_insert(id);
                if id.0 < slot.0 {
                    *slot = id;
                }
                groups.entry(key).or_default().push(name);
            }
        }
        inner.alias_groups = groups;
    }

    pub fn resolve(&self, name: &str) -> Option<VarId> {
        self.inner.lock().names.get(name).copied()
    }

    pub fn view(&self, name: &str) -> Option<VarView> {
        let inner = self.inner.lock();
        let id = *inner.names.get(name)?;
        let var = &inner.vars[id.0];
        Some(VarView {
            id,
            address: var.address.clone(),
            var_type: var.var_type,
            read_only: var.read_only,
            has_initial: var.initial_value.is_some(),
        })
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        let inner = self.inner.lock();
        let id = inner.names.get(name)?;
        inner.vars[id.0].value
    }

    /// Full clone of a variable, mostly for inspection and tests.
    pub fn variable(&self, name: &str) -> Option<Variable> {
        let inner = self.inner.lock();
        let id = inner.names.get(name)?;
        Some(inner.vars[id.0].clone())
    }

    /// One-shot change query (read-and-reset).
    pub fn take_changed(&self, name: &str) -> Option<bool> {
        let mut inner = self.inner.lock();
        let id = *inner.names.get(name)?;
        Some(inner.vars[id.0].take_changed())
    }

    /// Names bound to a canonical key, in declaration order.
    pub fn aliases(&self, key: &str) -> Vec<String> {
        self.inner
            .lock()
            .alias_groups
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a value freshly read from the device and return it after
    /// width coercion. Updates the change flag, no propagation: the
    /// device copy is the source of truth and sibling views get their
    /// own reads.
    pub(crate) fn store_read(&self, id: VarId, value: Value) -> Value {
        let mut inner = self.inner.lock();
        let var = &mut inner.vars[id.0];
        var.set_value(value);
        var.value.unwrap_or(value)
    }

    /// Commit a confirmed device write and propagate it to every other
    /// granularity sharing the storage.
    pub(crate) fn commit_write(&self, id: VarId, value: Value, order: WordOrder) {
        let mut inner = self.inner.lock();
        let address = inner.vars[id.0].address.clone();
        inner.vars[id.0].set_value(value);
        match address.base {
            Base::Word => sync::word_to_bytes_bits(&mut inner, address.index),
            Base::Byte => sync::byte_to_word(&mut inner, address.index),
            Base::Bit => sync::bit_to_byte_word(&mut inner, address.index),
            Base::DoubleWord => sync::dword_to_words(&mut inner, address.index, order),
            Base::DiscreteInput => {}
        }
    }
}

fn declare_entry(inner: &mut RegistryInner, entry: &DeclEntry, auto: bool) {
    let address = match Address::parse(&entry.address) {
        Ok(address) => address,
        Err(err) => {
            warn!("skipping '{}': {err}", entry.name);
            return;
        }
    };
    let key = address.canonical_key();

    if let Some(&id) = inner.cells.get(&key) {
        // Alias: bind the name to the existing variable, never create a
        // second one for the same cell.
        if inner.names.contains_key(&entry.name) {
            return;
        }
        inner.names.insert(entry.name.clone(), id);
        inner
            .alias_groups
            .entry(key)
            .or_default()
            .push(entry.name.clone());

        let var = &mut inner.vars[id.0];
        if let Some(init) = entry.initial {
            let init = Value::for_type(var.var_type, init as u32);
            if var.initial_value.is_none() {
                var.initial_value = Some(init);
            }
            if var.value.is_none() {
                var.value = Some(init);
            }
        }
        if entry.read_only && !var.read_only {
            var.read_only = true;
        }
        return;
    }

    let mut var = Variable::new(&entry.name, address.clone(), entry.var_type, &entry.description);
    var.read_only = entry.read_only || address.base == Base::DiscreteInput;
    var.auto_generated = auto;
    if let Some(init) = entry.initial {
        let init = Value::for_type(entry.var_type, init as u32);
        var.initial_value = Some(init);
        var.value = Some(init);
    }

    let id = VarId(inner.vars.len());
    inner.vars.push(var);
    inner.names.insert(entry.name.clone(), id);
    inner.cells.insert(key.clone(), id);
    inner.alias_groups.insert(key, vec![entry.name.clone()]);

    expand_children(inner, entry, &address);
}

/// Synthesize the hierarchical children of a freshly declared cell:
/// byte pair for a word, 8 bits for a byte. Children are tagged
/// auto-generated and inherit the parent's read-only policy. Recursion
/// bottoms out at bits.
fn expand_children(inner: &mut RegistryInner, entry: &DeclEntry, address: &Address) {
    match address.base {
        Base::Word => {
            let Some(low_index) = address.index.checked_mul(2) else {
                return;
            };
            let Some(high_index) = low_index.checked_add(1) else {
                return;
            };
            for (suffix, byte_index) in [("LowByte", low_index), ("HighByte", high_index)] {
                let child = DeclEntry {
                    name: format!("{}_{suffix}", entry.name),
                    address: format!("%MB{byte_index}"),
                    var_type: VarType::Byte,
                    description: format!("{suffix} of {}", entry.name),
                    initial: None,
                    read_only: entry.read_only,
                };
                declare_entry(inner, &child, true);
            }
        }
        Base::Byte => {
            for bit in 0..8u8 {
                let child = DeclEntry {
                    name: format!("{}_Bit{bit}", entry.name),
                    address: format!("%MX{}.{bit}", address.index),
                    var_type: VarType::Bool,
                    description: format!("bit {bit} of {}", entry.name),
                    initial: None,
                    read_only: entry.read_only,
                };
                declare_entry(inner, &child, true);
            }
        }
        _ => {}
    }
}
