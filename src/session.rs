use std::collections::HashMap;
use std::mem;

use log::{debug, info, warn};

use crate::engine::{EngineError, ExecutionEngine, SymbolKind, SymbolRecord};
use crate::error::ReplError;
use crate::indirection::{SlotSnapshot, SlotTable};
use crate::native::NativeModule;

/// What the session keeps about a loaded compilation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub symbols: Vec<String>,
    /// CLIF of the module's functions as handed to the engine.
    pub clif: String,
    pub input: u32,
}

/// Undo log of the input in progress.
struct Journal {
    evicted: Vec<(String, SymbolRecord)>,
    added: Vec<String>,
    slots: SlotSnapshot,
    loaded: HashMap<String, LoadedModule>,
}

/// Owns the execution engine and the pointer slots; evicts, loads,
/// repoints and invokes on behalf of the driver.
pub struct ExecutionSession<E: ExecutionEngine> {
    engine: E,
    slots: SlotTable,
    loaded: HashMap<String, LoadedModule>,
    journal: Option<Journal>,
}

impl<E: ExecutionEngine> ExecutionSession<E> {
    pub fn new(engine: E) -> Self {
        ExecutionSession {
            engine,
            slots: SlotTable::new(),
            loaded: HashMap::new(),
            journal: None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Mutable slots, for the rewriter to create slots on first reference.
    pub fn slots_mut(&mut self) -> &mut SlotTable {
        &mut self.slots
    }

    /// Loaded modules keyed by unit identity.
    pub fn loaded(&self) -> &HashMap<String, LoadedModule> {
        &self.loaded
    }

    /// Start journaling the mutations of one input.
    pub fn begin_input(&mut self) {
        self.journal = Some(Journal {
            evicted: Vec::new(),
            added: Vec::new(),
            slots: self.slots.snapshot(),
            loaded: self.loaded.clone(),
        });
    }

    /// Remove a superseded symbol from the engine. A symbol that was never
    /// loaded is not an error.
    pub fn evict(&mut self, name: &str) -> Result<(), EngineError> {
        match self.engine.remove_symbol(name) {
            Ok(record) => {
                debug!("evicted {} ({})", name, record.kind);
                if let Some(journal) = self.journal.as_mut() {
                    journal.evicted.push((name.to_string(), record));
                }
                Ok(())
            }
            Err(EngineError::NotFound(_)) => {
                debug!("{} not loaded yet, nothing to evict", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Hand a rewritten module to the engine and record it.
    pub fn load(
        &mut self,
        module: NativeModule,
        input: u32,
    ) -> Result<Vec<(String, SymbolRecord)>, EngineError> {
        let identity = module.name.clone();
        let clif = module.clif();
        let defined = self.engine.add_module(module)?;
        let symbols: Vec<String> = defined.iter().map(|(name, _)| name.clone()).collect();
        debug!("loaded {}: [{}]", identity, symbols.join(", "));
        if let Some(journal) = self.journal.as_mut() {
            journal.added.extend(symbols.iter().cloned());
        }
        self.loaded.insert(
            identity,
            LoadedModule {
                symbols,
                clif,
                input,
            },
        );
        Ok(defined)
    }

    /// Point the slot of every defined function (and its aliases) at its code.
    pub fn repoint(&mut self, defined: &[(String, SymbolRecord)]) {
        for (name, record) in defined {
            if record.kind == SymbolKind::Function {
                debug!("repoint {} -> {:p}", name, record.address);
                self.slots.repoint(name, record.address);
            }
        }
    }

    /// Drop the journal; the input's mutations become permanent.
    pub fn commit_input(&mut self) {
        if let Some(journal) = self.journal.take() {
            info!(
                "committed input: {} symbol(s) added, {} evicted",
                journal.added.len(),
                journal.evicted.len()
            );
        }
    }

    /// Undo every mutation since `begin_input`: added symbols are forgotten,
    /// evicted ones restored, slots and the loaded-module set reset.
    pub fn rollback_input(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        warn!(
            "rolling back input: {} symbol(s) added, {} evicted",
            journal.added.len(),
            journal.evicted.len()
        );
        for name in journal.added.iter().rev() {
            self.engine.forget_symbol(name);
        }
        for (name, record) in journal.evicted.into_iter().rev() {
            self.engine.restore_symbol(&name, record);
        }
        self.slots.restore(&journal.slots);
        self.loaded = journal.loaded;
    }

    /// Call an input's entry function. Refuses while any slot is null.
    pub fn invoke(&mut self, entry: &str) -> Result<(), ReplError> {
        let unfilled = self.slots.unfilled();
        if !unfilled.is_empty() {
            return Err(ReplError::EntryInvocation {
                symbol: entry.to_string(),
                reason: format!("undefined function(s): {}", unfilled.join(", ")),
            });
        }
        let record = match self.engine.lookup_symbol(entry) {
            Some(r) if r.kind == SymbolKind::Function => r,
            _ => {
                return Err(ReplError::EntryInvocation {
                    symbol: entry.to_string(),
                    reason: "entry symbol is not loaded".to_string(),
                })
            }
        };
        debug!("invoking {} at {:p}", entry, record.address);
        // SAFETY: entry functions are lowered with signature `() -> ()` in the
        // engine's default calling convention, and every slot they may reach
        // holds a live function address (checked above).
        let entry_fn = unsafe { mem::transmute::<*const u8, extern "C" fn()>(record.address) };
        entry_fn();
        Ok(())
    }

    /// Read the 8-byte cell of a global variable.
    pub fn read_value(&self, symbol: &str) -> Option<i64> {
        let record = self.engine.lookup_symbol(symbol)?;
        if record.kind != SymbolKind::Data {
            return None;
        }
        // SAFETY: data symbols are 8-byte aligned zero-initialised cells owned
        // by the engine for its whole life.
        Some(unsafe { std::ptr::read_volatile(record.address as *const i64) })
    }

    pub fn shutdown(self) {
        self.engine.shutdown();
    }
}
