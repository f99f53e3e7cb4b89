use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, trace};

use crate::names::is_function_identity;
use crate::native::{call_sites, replace_call, CallTarget, NativeModule};

/// Cells per page. Pages are never freed or moved, so cell addresses are
/// stable for the life of the table.
const PAGE_SIZE: usize = 256;

type Page = Box<[AtomicUsize; PAGE_SIZE]>;

/// One pointer slot per function identity: an 8-byte cell holding the
/// current code address of that function, or 0 until it is defined.
pub struct SlotTable {
    pages: Vec<Page>,
    index: HashMap<String, usize>,
    names: Vec<String>,
}

/// Saved slot contents for rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    values: Vec<usize>,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    pub fn new() -> Self {
        SlotTable {
            pages: Vec::new(),
            index: HashMap::new(),
            names: Vec::new(),
        }
    }

    fn cell(&self, slot: usize) -> &AtomicUsize {
        &self.pages[slot / PAGE_SIZE][slot % PAGE_SIZE]
    }

    /// Slot number for `name`, creating a null slot on first reference.
    pub fn slot_for(&mut self, name: &str) -> usize {
        if let Some(&slot) = self.index.get(name) {
            return slot;
        }
        let slot = self.names.len();
        if slot / PAGE_SIZE == self.pages.len() {
            self.pages
                .push(Box::new(std::array::from_fn(|_| AtomicUsize::new(0))));
        }
        self.index.insert(name.to_string(), slot);
        self.names.push(name.to_string());
        trace!("new slot {} for {}", slot, name);
        slot
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Reader capability: address of the cell backing `name`, for embedding in code.
    pub fn address_of(&self, name: &str) -> Option<i64> {
        self.index
            .get(name)
            .map(|&slot| self.cell(slot) as *const AtomicUsize as i64)
    }

    /// Current value of the cell backing `name`.
    pub fn value_of(&self, name: &str) -> Option<usize> {
        self.index
            .get(name)
            .map(|&slot| self.cell(slot).load(Ordering::Acquire))
    }

    /// Writer capability: point the slot for `name` at `address`.
    /// Creates the slot if nothing referenced it yet.
    pub fn repoint(&mut self, name: &str, address: *const u8) {
        let slot = self.slot_for(name);
        self.cell(slot).store(address as usize, Ordering::Release);
    }

    /// Names whose slots still hold null.
    pub fn unfilled(&self) -> Vec<&str> {
        self.names
            .iter()
            .enumerate()
            .filter(|(slot, _)| self.cell(*slot).load(Ordering::Acquire) == 0)
            .map(|(_, name)| name.as_str())
            .collect()
    }

    /// All slots as (name, value) in creation order.
    pub fn entries(&self) -> Vec<(&str, usize)> {
        self.names
            .iter()
            .enumerate()
            .map(|(slot, name)| (name.as_str(), self.cell(slot).load(Ordering::Acquire)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            values: (0..self.names.len())
                .map(|slot| self.cell(slot).load(Ordering::Acquire))
                .collect(),
        }
    }

    /// Restore contents and drop slots created after `snapshot` was taken.
    pub fn restore(&mut self, snapshot: &SlotSnapshot) {
        let keep = snapshot.values.len();
        for name in self.names.drain(keep..) {
            self.index.remove(&name);
        }
        for slot in keep..self.pages.len() * PAGE_SIZE {
            self.cell(slot).store(0, Ordering::Release);
        }
        for (slot, value) in snapshot.values.iter().enumerate() {
            self.cell(slot).store(*value, Ordering::Release);
        }
    }
}

/// Route every direct call to a session function through its pointer slot:
/// `iconst <cell>`, `load.i64`, `call_indirect`. Calls to anything else are
/// left for the engine to resolve. Returns the number of rewritten calls.
pub fn rewrite_calls(module: &mut NativeModule, slots: &mut SlotTable) -> usize {
    let mut rewritten = 0;
    for native in &mut module.functions {
        for site in call_sites(&native.function, &module.externals) {
            if !is_function_identity(&site.callee) {
                continue;
            }
            slots.slot_for(&site.callee);
            let Some(cell) = slots.address_of(&site.callee) else {
                continue;
            };
            replace_call(&mut native.function, &site, CallTarget::Slot(cell));
            rewritten += 1;
        }
        debug!(
            "{}: after rewriting\n{}",
            native.symbol,
            native.function.display()
        );
    }
    debug!("{}: {} call(s) routed through slots", module.name, rewritten);
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_start_null_and_are_stable() {
        let mut slots = SlotTable::new();
        slots.slot_for("_S1fF_i");
        let addr = slots.address_of("_S1fF_i").unwrap();
        for i in 0..(PAGE_SIZE * 2) {
            slots.slot_for(&format!("_S1gFi_{}", i));
        }
        assert_eq!(slots.address_of("_S1fF_i"), Some(addr));
        assert_eq!(slots.value_of("_S1fF_i"), Some(0));
        assert_eq!(slots.slot_for("_S1fF_i"), 0);
    }

    #[test]
    fn repoint_writes_the_cell() {
        let mut slots = SlotTable::new();
        slots.slot_for("f");
        slots.repoint("f", 0x1234 as *const u8);
        let addr = slots.address_of("f").unwrap() as *const usize;
        assert_eq!(unsafe { *addr }, 0x1234);
        assert!(slots.unfilled().is_empty());
    }

    #[test]
    fn unfilled_lists_null_slots() {
        let mut slots = SlotTable::new();
        slots.slot_for("a");
        slots.repoint("b", 0x10 as *const u8);
        assert_eq!(slots.unfilled(), vec!["a"]);
    }

    #[test]
    fn restore_undoes_writes_and_new_slots() {
        let mut slots = SlotTable::new();
        slots.repoint("a", 0x10 as *const u8);
        let snapshot = slots.snapshot();
        slots.repoint("a", 0x20 as *const u8);
        slots.repoint("b", 0x30 as *const u8);
        slots.restore(&snapshot);
        assert_eq!(slots.value_of("a"), Some(0x10));
        assert!(!slots.contains("b"));
        assert_eq!(slots.len(), 1);
        assert_eq!(slots.snapshot(), snapshot);
        slots.slot_for("c");
        assert_eq!(slots.value_of("c"), Some(0));
    }
}
