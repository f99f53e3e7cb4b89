use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cranelift::codegen::isa::{CallConv, TargetIsa};
use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, DataDescription, DataId, FuncId, Module, ModuleError};
use log::{debug, trace};
use thiserror::Error;

use crate::native::{
    call_sites, data_references, replace_call, replace_symbol_value, CallTarget, NativeModule,
};
use crate::runtime;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("symbol `{0}` not found")]
    NotFound(String),
    #[error("symbol `{0}` cannot be removed")]
    Unremovable(String),
    #[error("unresolved symbol `{symbol}` referenced from `{module}`")]
    Unresolved { symbol: String, module: String },
    #[error("symbol `{0}` is already defined")]
    Duplicate(String),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error("failed to build ISA: {0}")]
    Isa(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Data,
    /// Host function; pinned for the life of the engine.
    Runtime,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "function"),
            SymbolKind::Data => write!(f, "data"),
            SymbolKind::Runtime => write!(f, "runtime"),
        }
    }
}

/// An entry of the engine's symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRecord {
    pub address: *const u8,
    pub kind: SymbolKind,
}

/// A process-local loader for native modules.
pub trait ExecutionEngine {
    /// Compile and link a module. Returns every symbol it defined.
    fn add_module(&mut self, module: NativeModule)
        -> Result<Vec<(String, SymbolRecord)>, EngineError>;

    fn lookup_symbol(&self, name: &str) -> Option<SymbolRecord>;

    /// Unbind a symbol so a later module may define it again.
    /// Returns the removed record so the removal can be undone.
    fn remove_symbol(&mut self, name: &str) -> Result<SymbolRecord, EngineError>;

    /// Rebind a symbol previously returned by `remove_symbol`.
    fn restore_symbol(&mut self, name: &str, record: SymbolRecord);

    /// Drop symbols bound by a module whose input is being rolled back.
    fn forget_symbol(&mut self, name: &str);

    fn default_call_conv(&self) -> CallConv;

    /// Release all generated code and data.
    fn shutdown(self)
    where
        Self: Sized;
}

/// Build the ISA for the current host architecture.
fn build_isa() -> Result<Arc<dyn TargetIsa>, EngineError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("use_colocated_libcalls", "false")
        .map_err(|e| EngineError::Isa(format!("failed to set flag: {}", e)))?;
    flag_builder
        .set("is_pic", "false")
        .map_err(|e| EngineError::Isa(format!("failed to set flag: {}", e)))?;

    let isa_builder = cranelift_native::builder()
        .map_err(|msg| EngineError::Isa(format!("host not supported: {}", msg)))?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| EngineError::Isa(e.to_string()))
}

/// The in-process engine: one `JITModule` holding every definition of the
/// session. Definitions are anonymous, so redefining a name never collides
/// inside the JIT; name binding lives in the engine's own symbol table.
pub struct JitEngine {
    module: JITModule,
    ctx: cranelift::codegen::Context,
    symbols: HashMap<String, SymbolRecord>,
}

impl JitEngine {
    pub fn new() -> Result<Self, EngineError> {
        let isa = build_isa()?;
        let builder = JITBuilder::with_isa(isa, default_libcall_names());
        let module = JITModule::new(builder);
        let ctx = module.make_context();
        let mut symbols = HashMap::new();
        for (name, address) in runtime::symbols() {
            symbols.insert(
                name.to_string(),
                SymbolRecord {
                    address,
                    kind: SymbolKind::Runtime,
                },
            );
        }
        Ok(JitEngine {
            module,
            ctx,
            symbols,
        })
    }

    /// Current symbol table, sorted by name.
    pub fn symbols(&self) -> Vec<(&str, SymbolRecord)> {
        let mut out: Vec<(&str, SymbolRecord)> =
            self.symbols.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    fn resolve(
        &self,
        name: &str,
        wanted: &[SymbolKind],
        pending: &HashMap<String, SymbolRecord>,
        module: &str,
    ) -> Result<i64, EngineError> {
        pending
            .get(name)
            .or_else(|| self.symbols.get(name))
            .filter(|r| wanted.contains(&r.kind))
            .map(|r| r.address as i64)
            .ok_or_else(|| EngineError::Unresolved {
                symbol: name.to_string(),
                module: module.to_string(),
            })
    }
}

impl ExecutionEngine for JitEngine {
    fn add_module(
        &mut self,
        mut native: NativeModule,
    ) -> Result<Vec<(String, SymbolRecord)>, EngineError> {
        for symbol in native.defined_symbols() {
            if self.symbols.contains_key(&symbol) {
                return Err(EngineError::Duplicate(symbol));
            }
        }

        let mut pending: HashMap<String, SymbolRecord> = HashMap::new();

        if !native.data.is_empty() {
            let mut data_ids: Vec<(String, DataId)> = Vec::new();
            for data in &native.data {
                let id = self.module.declare_anonymous_data(true, false)?;
                let mut desc = DataDescription::new();
                desc.define_zeroinit(data.size);
                desc.set_align(8);
                self.module.define_data(id, &desc)?;
                data_ids.push((data.symbol.clone(), id));
            }
            self.module.finalize_definitions()?;
            for (symbol, id) in data_ids {
                let (address, _) = self.module.get_finalized_data(id);
                trace!("data {} at {:p}", symbol, address);
                pending.insert(
                    symbol,
                    SymbolRecord {
                        address,
                        kind: SymbolKind::Data,
                    },
                );
            }
        }

        let mut func_ids: Vec<(String, Vec<String>, FuncId)> = Vec::new();
        for function in &mut native.functions {
            for site in call_sites(&function.function, &native.externals) {
                let address = self.resolve(
                    &site.callee,
                    &[SymbolKind::Function, SymbolKind::Runtime],
                    &pending,
                    &native.name,
                )?;
                replace_call(&mut function.function, &site, CallTarget::Address(address));
            }
            for reference in data_references(&function.function, &native.externals) {
                let address =
                    self.resolve(&reference.symbol, &[SymbolKind::Data], &pending, &native.name)?;
                replace_symbol_value(&mut function.function, &reference, address);
            }

            let func_id = self
                .module
                .declare_anonymous_function(&function.function.signature)?;
            self.ctx.func = std::mem::replace(
                &mut function.function,
                cranelift::codegen::ir::Function::new(),
            );
            let defined = self.module.define_function(func_id, &mut self.ctx);
            self.module.clear_context(&mut self.ctx);
            defined?;
            func_ids.push((function.symbol.clone(), function.aliases.clone(), func_id));
        }

        if !func_ids.is_empty() {
            self.module.finalize_definitions()?;
        }
        for (symbol, aliases, id) in func_ids {
            let address = self.module.get_finalized_function(id);
            trace!("function {} at {:p}", symbol, address);
            let record = SymbolRecord {
                address,
                kind: SymbolKind::Function,
            };
            pending.insert(symbol, record);
            for alias in aliases {
                pending.insert(alias, record);
            }
        }

        debug!(
            "loaded {}: {} symbol(s)",
            native.name,
            pending.len()
        );
        let defined: Vec<(String, SymbolRecord)> = pending.into_iter().collect();
        for (name, record) in &defined {
            self.symbols.insert(name.clone(), *record);
        }
        Ok(defined)
    }

    fn lookup_symbol(&self, name: &str) -> Option<SymbolRecord> {
        self.symbols.get(name).copied()
    }

    fn remove_symbol(&mut self, name: &str) -> Result<SymbolRecord, EngineError> {
        match self.symbols.get(name) {
            None => Err(EngineError::NotFound(name.to_string())),
            Some(record) if record.kind == SymbolKind::Runtime => {
                Err(EngineError::Unremovable(name.to_string()))
            }
            Some(_) => {
                let record = self.symbols.remove(name).ok_or_else(|| {
                    EngineError::NotFound(name.to_string())
                })?;
                debug!("removed {} ({})", name, record.kind);
                Ok(record)
            }
        }
    }

    fn restore_symbol(&mut self, name: &str, record: SymbolRecord) {
        debug!("restored {} ({})", name, record.kind);
        self.symbols.insert(name.to_string(), record);
    }

    fn forget_symbol(&mut self, name: &str) {
        if let Some(record) = self.symbols.get(name) {
            if record.kind != SymbolKind::Runtime {
                self.symbols.remove(name);
            }
        }
    }

    fn default_call_conv(&self) -> CallConv {
        self.module.isa().default_call_conv()
    }

    fn shutdown(self) {
        // SAFETY: consuming the engine guarantees no caller can reach the
        // generated code afterwards.
        unsafe { self.module.free_memory() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::CodeGenerator;
    use crate::frontend::{FrontEnd, Input};
    use crate::namespace::Namespace;
    use crate::partition::partition;

    fn lower(src: &str, engine: &JitEngine) -> Vec<NativeModule> {
        let ns = Namespace::new();
        let input = Input::new(2, src);
        let decls = FrontEnd::compile(&input, &ns).unwrap();
        let mut cg = CodeGenerator::new(engine.default_call_conv());
        partition(decls, &input.module_name(), &ns)
            .iter()
            .map(|u| cg.lower(u).unwrap())
            .collect()
    }

    #[test]
    fn runtime_symbols_are_pinned() {
        let mut engine = JitEngine::new().unwrap();
        assert!(engine.lookup_symbol(runtime::PRINT_INT).is_some());
        assert!(matches!(
            engine.remove_symbol(runtime::PRINT_INT),
            Err(EngineError::Unremovable(_))
        ));
        assert!(matches!(
            engine.remove_symbol("nothing"),
            Err(EngineError::NotFound(_))
        ));
        engine.shutdown();
    }

    #[test]
    fn load_data_then_function_reading_it() {
        let mut engine = JitEngine::new().unwrap();
        let mut modules = lower("var x = 0\nfunc get() -> Int { x }", &engine).into_iter();
        let data = modules.next().unwrap();
        let defined = engine.add_module(data).unwrap();
        assert_eq!(defined.len(), 1);
        let cell = engine.lookup_symbol("x").unwrap();
        assert_eq!(cell.kind, SymbolKind::Data);
        unsafe { *(cell.address as *mut i64) = 41 };

        engine.add_module(modules.next().unwrap()).unwrap();
        let get = engine.lookup_symbol("_S3getF_i").unwrap();
        let f = unsafe { std::mem::transmute::<*const u8, extern "C" fn() -> i64>(get.address) };
        assert_eq!(f(), 41);
        engine.shutdown();
    }

    #[test]
    fn unresolved_reference_fails_the_load() {
        let mut engine = JitEngine::new().unwrap();
        let function = lower("var x = 0\nfunc get() -> Int { x }", &engine)
            .into_iter()
            .find(|m| m.name == "_S3getF_i")
            .unwrap();
        let err = engine.add_module(function).unwrap_err();
        assert!(matches!(err, EngineError::Unresolved { ref symbol, .. } if symbol == "x"));
        assert!(engine.lookup_symbol("_S3getF_i").is_none());
        engine.shutdown();
    }

    #[test]
    fn duplicate_definition_is_rejected_until_removed() {
        let mut engine = JitEngine::new().unwrap();
        // The data unit comes first; the entry that stores 0 follows it.
        let first = lower("var x = 0", &engine).into_iter().next().unwrap();
        assert_eq!(first.name, "x");
        engine.add_module(first).unwrap();
        let second = lower("var x = 0", &engine).into_iter().next().unwrap();
        assert!(matches!(
            engine.add_module(second),
            Err(EngineError::Duplicate(_))
        ));
        let removed = engine.remove_symbol("x").unwrap();
        assert!(engine.lookup_symbol("x").is_none());
        engine.restore_symbol("x", removed);
        assert_eq!(engine.lookup_symbol("x"), Some(removed));
        engine.shutdown();
    }
}
