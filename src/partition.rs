use log::debug;

use crate::frontend::{DeclKind, TypedDeclaration};
use crate::names::{IdentityName, SurfaceName};
use crate::namespace::{Namespace, UnitId};

/// A dependency edge from a unit to the unit providing one of its references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Import {
    /// Provided by a unit bound by an earlier input.
    Prior { identity: IdentityName, unit: UnitId },
    /// Provided by an earlier unit of the same input, by batch index.
    Batch { identity: IdentityName, index: usize },
}

impl Import {
    pub fn identity(&self) -> &IdentityName {
        match self {
            Import::Prior { identity, .. } | Import::Batch { identity, .. } => identity,
        }
    }
}

/// One independently linkable piece of an input: exactly one declaration.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub declaration: TypedDeclaration,
    pub identity: IdentityName,
    pub surface: SurfaceName,
    pub imports: Vec<Import>,
    /// Whether this is the synthetic function running the input's top-level code.
    pub is_entry: bool,
}

impl CompilationUnit {
    pub fn new(declaration: TypedDeclaration, module_name: &str, imports: Vec<Import>) -> Self {
        let identity = declaration.identity();
        let surface = declaration.name.clone();
        let is_entry = declaration.kind() == DeclKind::Function && surface == module_name;
        CompilationUnit {
            declaration,
            identity,
            surface,
            imports,
            is_entry,
        }
    }
}

/// Split an input's declarations into one unit each, recording imports of
/// prior units and of earlier units in the same batch.
pub fn partition(
    declarations: Vec<TypedDeclaration>,
    module_name: &str,
    namespace: &Namespace,
) -> Vec<CompilationUnit> {
    let mut units: Vec<CompilationUnit> = Vec::with_capacity(declarations.len());
    for declaration in declarations {
        let own_identity = declaration.identity();
        let mut imports = Vec::new();
        for reference in &declaration.references {
            if *reference == own_identity {
                continue;
            }
            if let Some(index) = units.iter().position(|u| u.identity == *reference) {
                imports.push(Import::Batch {
                    identity: reference.clone(),
                    index,
                });
            } else if let Some(unit) = namespace.owner_id(reference) {
                imports.push(Import::Prior {
                    identity: reference.clone(),
                    unit,
                });
            }
        }
        let unit = CompilationUnit::new(declaration, module_name, imports);
        debug!(
            "unit {} `{}` ({}){}: imports [{}]",
            units.len(),
            unit.surface,
            unit.identity,
            if unit.is_entry { " entry" } else { "" },
            unit.imports
                .iter()
                .map(|i| i.identity().as_ref())
                .collect::<Vec<_>>()
                .join(", ")
        );
        units.push(unit);
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{FrontEnd, Input};
    use crate::namespace::Mode;

    fn units_for(ns: &Namespace, number: u32, src: &str) -> Vec<CompilationUnit> {
        let input = Input::new(number, src);
        let decls = FrontEnd::compile(&input, ns).unwrap();
        partition(decls, &input.module_name(), ns)
    }

    #[test]
    fn one_unit_per_declaration() {
        let ns = Namespace::new();
        let units = units_for(&ns, 2, "let a = 1\nfunc f() -> Int { a }\nf()");
        let surfaces: Vec<&str> = units.iter().map(|u| u.surface.as_ref()).collect();
        assert_eq!(surfaces, vec!["a", "$R2", "f", "__repl_2"]);
        assert!(units.last().unwrap().is_entry);
        assert!(units[..3].iter().all(|u| !u.is_entry));
    }

    #[test]
    fn batch_imports_point_backwards() {
        let ns = Namespace::new();
        let units = units_for(&ns, 2, "let a = 1\nfunc f() -> Int { a }\nf()");
        assert_eq!(
            units[2].imports,
            vec![Import::Batch {
                identity: IdentityName::from("a"),
                index: 0
            }]
        );
        let entry_imports: Vec<&str> = units[3].imports.iter().map(|i| i.identity().as_ref()).collect();
        assert_eq!(entry_imports, vec!["a", "_S1fF_i", "$R2"]);
    }

    #[test]
    fn recursion_is_not_an_import() {
        let ns = Namespace::new();
        let units = units_for(&ns, 2, "func loop(n: Int) -> Int { if n == 0 { 0 } else { loop(n - 1) } }");
        assert!(units[0].imports.is_empty());
    }

    #[test]
    fn later_batch_units_are_not_imports() {
        let ns = Namespace::new();
        let units = units_for(
            &ns,
            2,
            "func a() -> Int { b() }\nfunc b() -> Int { 1 }",
        );
        assert!(units[0].imports.is_empty());
        assert_eq!(units[1].imports.len(), 0);
    }

    #[test]
    fn prior_imports_name_the_owning_unit() {
        let mut ns = Namespace::new();
        for unit in units_for(&ns, 2, "func g() -> Int { 7 }") {
            ns.validate(&unit, Mode::Permissive).unwrap();
            ns.bind(&unit, 2);
        }
        let units = units_for(&ns, 3, "func h() -> Int { g() + 1 }");
        assert_eq!(
            units[0].imports,
            vec![Import::Prior {
                identity: IdentityName::from("_S1gF_i"),
                unit: 0
            }]
        );
    }
}
