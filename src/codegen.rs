use std::collections::HashMap;

use cranelift::codegen::ir::{self, FuncRef, GlobalValue, UserExternalName, UserFuncName};
use cranelift::prelude::*;
use log::debug;

use crate::error::LowerError;
use crate::frontend::DeclarationBody;
use crate::native::{NativeData, NativeFunction, NativeModule, DATA_NAMESPACE, FUNC_NAMESPACE};
use crate::partition::CompilationUnit;
use crate::typechecker::{LocalId, TBlock};
use crate::types::FnSig;

mod expr;

/// Every Splice value is one machine word.
pub(crate) const WORD: ir::Type = types::I64;

/// Size of a global variable's cell in bytes.
pub const CELL_SIZE: usize = 8;

/// Build the native signature of a Splice function.
pub fn native_signature(sig: &FnSig, call_conv: isa::CallConv) -> Signature {
    let mut native = Signature::new(call_conv);
    for _ in &sig.params {
        native.params.push(AbiParam::new(WORD));
    }
    if sig.ret.has_value() {
        native.returns.push(AbiParam::new(WORD));
    }
    native
}

/// Lowers compilation units to Cranelift IR.
pub struct CodeGenerator {
    call_conv: isa::CallConv,
    func_ctx: FunctionBuilderContext,
}

impl CodeGenerator {
    pub fn new(call_conv: isa::CallConv) -> Self {
        CodeGenerator {
            call_conv,
            func_ctx: FunctionBuilderContext::new(),
        }
    }

    /// Lower one unit. Functions become IR with direct calls to external
    /// names, variables become 8-byte zeroed data, type aliases produce an
    /// empty module.
    pub fn lower(&mut self, unit: &CompilationUnit) -> Result<NativeModule, LowerError> {
        let mut module = NativeModule::new(unit.identity.to_string());
        match &unit.declaration.body {
            DeclarationBody::Function { sig, params, body } => {
                let function = self.lower_function(&mut module, unit, sig, params.len(), body)?;
                debug!(
                    "{}: lowered\n{}",
                    unit.identity,
                    function.display()
                );
                let aliases = if unit.is_entry {
                    vec![unit.surface.to_string()]
                } else {
                    Vec::new()
                };
                module.functions.push(NativeFunction {
                    symbol: unit.identity.to_string(),
                    aliases,
                    function,
                });
            }
            DeclarationBody::Variable { .. } => {
                debug!("{}: data cell of {} bytes", unit.identity, CELL_SIZE);
                module.data.push(NativeData {
                    symbol: unit.identity.to_string(),
                    size: CELL_SIZE,
                });
            }
            DeclarationBody::TypeAlias { .. } => {
                debug!("{}: type alias, nothing to emit", unit.identity);
            }
        }
        Ok(module)
    }

    fn lower_function(
        &mut self,
        module: &mut NativeModule,
        unit: &CompilationUnit,
        sig: &FnSig,
        param_count: usize,
        body: &TBlock,
    ) -> Result<ir::Function, LowerError> {
        let native_sig = native_signature(sig, self.call_conv);
        let mut func = ir::Function::with_name_signature(
            UserFuncName::testcase(unit.identity.as_ref()),
            native_sig,
        );
        {
            let builder = FunctionBuilder::new(&mut func, &mut self.func_ctx);
            let mut compiler = FnCompiler {
                builder,
                module,
                unit: unit.identity.as_ref(),
                call_conv: self.call_conv,
                locals: HashMap::new(),
                func_refs: HashMap::new(),
                data_refs: HashMap::new(),
            };
            let entry = compiler.builder.create_block();
            compiler
                .builder
                .append_block_params_for_function_params(entry);
            compiler.builder.switch_to_block(entry);
            for i in 0..param_count {
                let value = compiler.builder.block_params(entry)[i];
                let var = compiler.builder.declare_var(WORD);
                compiler.builder.def_var(var, value);
                compiler.locals.insert(i as LocalId, var);
            }
            let result = compiler.compile_block(body)?;
            if sig.ret.has_value() {
                compiler.builder.ins().return_(&[result]);
            } else {
                compiler.builder.ins().return_(&[]);
            }
            compiler.builder.seal_all_blocks();
            compiler.builder.finalize();
        }
        Ok(func)
    }
}

pub(crate) struct FnCompiler<'a> {
    pub(crate) builder: FunctionBuilder<'a>,
    pub(crate) module: &'a mut NativeModule,
    /// Identity of the unit being lowered, for error messages.
    pub(crate) unit: &'a str,
    pub(crate) call_conv: isa::CallConv,
    pub(crate) locals: HashMap<LocalId, Variable>,
    func_refs: HashMap<String, FuncRef>,
    data_refs: HashMap<String, GlobalValue>,
}

impl FnCompiler<'_> {
    pub(crate) fn error(&self, message: impl Into<String>) -> LowerError {
        LowerError {
            unit: self.unit.to_string(),
            message: message.into(),
        }
    }

    /// Import `symbol` as a callable external function, once per function.
    pub(crate) fn func_ref(&mut self, symbol: &str, sig: &FnSig) -> FuncRef {
        if let Some(&func_ref) = self.func_refs.get(symbol) {
            return func_ref;
        }
        let index = self.module.external_index(symbol);
        let name_ref = self
            .builder
            .func
            .declare_imported_user_function(UserExternalName::new(FUNC_NAMESPACE, index));
        let signature = self
            .builder
            .import_signature(native_signature(sig, self.call_conv));
        let func_ref = self.builder.import_function(ir::ExtFuncData {
            name: ir::ExternalName::User(name_ref),
            signature,
            colocated: false,
        });
        self.func_refs.insert(symbol.to_string(), func_ref);
        func_ref
    }

    /// Address of a global variable's cell.
    pub(crate) fn data_address(&mut self, symbol: &str) -> Value {
        let gv = match self.data_refs.get(symbol) {
            Some(&gv) => gv,
            None => {
                let index = self.module.external_index(symbol);
                let name_ref = self
                    .builder
                    .func
                    .declare_imported_user_function(UserExternalName::new(DATA_NAMESPACE, index));
                let gv = self.builder.create_global_value(ir::GlobalValueData::Symbol {
                    name: ir::ExternalName::User(name_ref),
                    offset: ir::immediates::Imm64::new(0),
                    colocated: false,
                    tls: false,
                });
                self.data_refs.insert(symbol.to_string(), gv);
                gv
            }
        };
        self.builder.ins().symbol_value(WORD, gv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{FrontEnd, Input};
    use crate::namespace::Namespace;
    use crate::native::{call_sites, data_references};
    use crate::partition::partition;

    fn lower_all(src: &str) -> Vec<NativeModule> {
        let ns = Namespace::new();
        let input = Input::new(2, src);
        let decls = FrontEnd::compile(&input, &ns).unwrap();
        let mut cg = CodeGenerator::new(isa::CallConv::SystemV);
        partition(decls, &input.module_name(), &ns)
            .iter()
            .map(|u| cg.lower(u).unwrap())
            .collect()
    }

    #[test]
    fn variable_becomes_data_cell() {
        let modules = lower_all("var x = 5");
        assert_eq!(modules[0].data.len(), 1);
        assert_eq!(modules[0].data[0].symbol, "x");
        assert_eq!(modules[0].data[0].size, CELL_SIZE);
        assert!(modules[0].functions.is_empty());
    }

    #[test]
    fn type_alias_is_empty() {
        let modules = lower_all("typealias T = Bool");
        assert!(modules[0].functions.is_empty());
        assert!(modules[0].data.is_empty());
    }

    #[test]
    fn calls_are_direct_before_rewriting() {
        let modules = lower_all("func f(n: Int) -> Int { if n < 1 { 0 } else { f(n - 1) + g() } }\nfunc g() -> Int { 1 }");
        let f = &modules[0].functions[0];
        let callees: Vec<String> = call_sites(&f.function, &modules[0].externals)
            .into_iter()
            .map(|s| s.callee)
            .collect();
        assert_eq!(callees, vec!["_S1fFi_i", "_S1gF_i"]);
    }

    #[test]
    fn entry_exports_its_surface_name() {
        let modules = lower_all("let x = 1\nprint(x)");
        let entry = &modules.last().unwrap().functions[0];
        assert_eq!(entry.symbol, "_S8__repl_2F_v");
        assert_eq!(entry.aliases, vec!["__repl_2"]);
        let data: Vec<String> = data_references(&entry.function, &modules.last().unwrap().externals)
            .into_iter()
            .map(|r| r.symbol)
            .collect();
        assert_eq!(data, vec!["x", "x"]);
    }

    #[test]
    fn signature_matches_declaration() {
        let modules = lower_all("func both(a: Int, b: Bool) { }");
        let f = &modules[0].functions[0].function;
        assert_eq!(f.signature.params.len(), 2);
        assert!(f.signature.returns.is_empty());
    }
}
