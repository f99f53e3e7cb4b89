//! Native modules: Cranelift IR produced for one compilation unit, plus the
//! IR surgery shared by the indirection rewriter and the engine's resolver.

use cranelift::codegen::cursor::{Cursor, FuncCursor};
use cranelift::codegen::ir::{
    self, ExternalName, FuncRef, GlobalValueData, Inst, InstructionData, Opcode, UserExternalName,
};
use cranelift::prelude::*;

/// `UserExternalName::namespace` of function symbols.
pub const FUNC_NAMESPACE: u32 = 0;
/// `UserExternalName::namespace` of data symbols.
pub const DATA_NAMESPACE: u32 = 1;

pub struct NativeFunction {
    /// Symbol the function is defined under (its identity name).
    pub symbol: String,
    /// Additional symbols bound to the same code.
    pub aliases: Vec<String>,
    pub function: ir::Function,
}

/// A zero-initialised data object.
pub struct NativeData {
    pub symbol: String,
    pub size: usize,
}

/// Output of lowering one compilation unit.
pub struct NativeModule {
    pub name: String,
    pub functions: Vec<NativeFunction>,
    pub data: Vec<NativeData>,
    /// External symbols referenced by the IR, indexed by `UserExternalName::index`.
    pub externals: Vec<String>,
}

impl NativeModule {
    pub fn new(name: impl Into<String>) -> Self {
        NativeModule {
            name: name.into(),
            functions: Vec::new(),
            data: Vec::new(),
            externals: Vec::new(),
        }
    }

    /// Intern an external symbol and return its index.
    pub fn external_index(&mut self, symbol: &str) -> u32 {
        match self.externals.iter().position(|s| s == symbol) {
            Some(i) => i as u32,
            None => {
                self.externals.push(symbol.to_string());
                (self.externals.len() - 1) as u32
            }
        }
    }

    /// Every symbol this module defines, function aliases included.
    pub fn defined_symbols(&self) -> Vec<String> {
        let mut out = Vec::new();
        for f in &self.functions {
            out.push(f.symbol.clone());
            out.extend(f.aliases.iter().cloned());
        }
        out.extend(self.data.iter().map(|d| d.symbol.clone()));
        out
    }

    /// CLIF text of every function in the module.
    pub fn clif(&self) -> String {
        let mut out = String::new();
        for f in &self.functions {
            out.push_str(&format!("; {}\n{}", f.symbol, f.function.display()));
        }
        out
    }
}

/// Resolve a user external name against a module's external table.
pub fn external_symbol<'a>(externals: &'a [String], name: &UserExternalName) -> Option<&'a str> {
    externals.get(name.index as usize).map(String::as_str)
}

/// A direct `call` instruction and the external symbol it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub inst: Inst,
    pub func_ref: FuncRef,
    pub callee: String,
}

/// Enumerate direct calls to user-named external functions.
pub fn call_sites(func: &ir::Function, externals: &[String]) -> Vec<CallSite> {
    let mut sites = Vec::new();
    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            let InstructionData::Call {
                opcode: Opcode::Call,
                func_ref,
                ..
            } = func.dfg.insts[inst]
            else {
                continue;
            };
            let ExternalName::User(name_ref) = func.dfg.ext_funcs[func_ref].name else {
                continue;
            };
            let name = &func.params.user_named_funcs()[name_ref];
            if name.namespace != FUNC_NAMESPACE {
                continue;
            }
            if let Some(callee) = external_symbol(externals, name) {
                sites.push(CallSite {
                    inst,
                    func_ref,
                    callee: callee.to_string(),
                });
            }
        }
    }
    sites
}

/// A `symbol_value` instruction and the data symbol it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReference {
    pub inst: Inst,
    pub symbol: String,
    pub offset: i64,
}

/// Enumerate `symbol_value` instructions naming user data symbols.
pub fn data_references(func: &ir::Function, externals: &[String]) -> Vec<DataReference> {
    let mut refs = Vec::new();
    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            let InstructionData::UnaryGlobalValue {
                opcode: Opcode::SymbolValue,
                global_value,
            } = func.dfg.insts[inst]
            else {
                continue;
            };
            let GlobalValueData::Symbol {
                name: ExternalName::User(name_ref),
                offset,
                ..
            } = func.global_values[global_value]
            else {
                continue;
            };
            let name = &func.params.user_named_funcs()[name_ref];
            if let Some(symbol) = external_symbol(externals, name) {
                refs.push(DataReference {
                    inst,
                    symbol: symbol.to_string(),
                    offset: offset.bits(),
                });
            }
        }
    }
    refs
}

/// How a rewritten call obtains its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// The code address itself.
    Address(i64),
    /// An 8-byte cell holding the code address, read at every call.
    Slot(i64),
}

/// Replace a direct call with `call_indirect` through `target`, keeping its
/// arguments and results.
pub fn replace_call(func: &mut ir::Function, site: &CallSite, target: CallTarget) {
    let sig_ref = func.dfg.ext_funcs[site.func_ref].signature;
    let args: Vec<Value> = func.dfg.inst_args(site.inst).to_vec();
    let mut pos = FuncCursor::new(func).at_inst(site.inst);
    let callee = match target {
        CallTarget::Address(addr) => pos.ins().iconst(types::I64, addr),
        CallTarget::Slot(cell) => {
            let cell = pos.ins().iconst(types::I64, cell);
            pos.ins().load(types::I64, MemFlags::trusted(), cell, 0)
        }
    };
    pos.func
        .dfg
        .replace(site.inst)
        .call_indirect(sig_ref, callee, &args);
}

/// Replace a `symbol_value` with the resolved address as a constant.
pub fn replace_symbol_value(func: &mut ir::Function, reference: &DataReference, address: i64) {
    func.dfg
        .replace(reference.inst)
        .iconst(types::I64, address.wrapping_add(reference.offset));
}
