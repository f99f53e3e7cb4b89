use std::collections::HashMap;

use log::trace;
use thiserror::Error;

use crate::frontend::{DeclKind, DeclarationBody};
use crate::names::{IdentityName, SurfaceName};
use crate::partition::CompilationUnit;
use crate::typechecker::{GlobalInfo, PriorScope};
use crate::types::{FnSig, Type};

/// Index into the unit history of a namespace.
pub type UnitId = usize;

/// How strictly redefinitions are policed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Functions may be redefined with an identical signature.
    #[default]
    Permissive,
    /// Playground mode: any existing function identity is final.
    Strict,
}

/// A unit the validator refused to bind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid redeclaration of `{name}`")]
pub struct Rejection {
    pub name: String,
}

/// Everything the namespace remembers about one bound unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    pub identity: IdentityName,
    pub surface: SurfaceName,
    pub kind: DeclKind,
    /// Signature of a function unit.
    pub sig: Option<FnSig>,
    /// Type of a variable, or target of a type alias.
    pub ty: Option<Type>,
    pub mutable: bool,
    /// Number of the input that bound this unit.
    pub input: u32,
}

/// Outcome of the redeclaration decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    /// Identity already names a non-function.
    RejectIdentityTaken,
    /// Surface name already bound, and not function-over-function.
    RejectSurfaceTaken,
    /// Strict mode forbids replacing an existing function identity.
    RejectStrictRedefinition,
}

/// Decide whether a new declaration of kind `new` may be bound, given the
/// kinds of the units currently owning its identity and surface names.
/// Rules apply in order; the first that matches wins.
pub fn decide(
    identity_owner: Option<DeclKind>,
    surface_owner: Option<DeclKind>,
    new: DeclKind,
    mode: Mode,
) -> Decision {
    match (identity_owner, surface_owner, new, mode) {
        (Some(owner), _, _, _) if owner != DeclKind::Function => Decision::RejectIdentityTaken,
        (_, Some(DeclKind::Function), DeclKind::Function, _) => match (identity_owner, mode) {
            (Some(_), Mode::Strict) => Decision::RejectStrictRedefinition,
            _ => Decision::Accept,
        },
        (_, Some(_), _, _) => Decision::RejectSurfaceTaken,
        (Some(_), None, DeclKind::Function, Mode::Strict) => Decision::RejectStrictRedefinition,
        _ => Decision::Accept,
    }
}

/// The persistent table mapping identity and surface names to the unit
/// currently providing them. Both kinds of name share one map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespace {
    entries: HashMap<String, UnitId>,
    units: Vec<UnitRecord>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// The unit currently providing `name`, if any.
    pub fn owner(&self, name: &str) -> Option<&UnitRecord> {
        self.entries.get(name).map(|&id| &self.units[id])
    }

    pub fn owner_id(&self, name: &str) -> Option<UnitId> {
        self.entries.get(name).copied()
    }

    pub fn unit(&self, id: UnitId) -> Option<&UnitRecord> {
        self.units.get(id)
    }

    /// A unit is current while it still owns its identity name.
    pub fn is_current(&self, id: UnitId) -> bool {
        self.units
            .get(id)
            .is_some_and(|u| self.entries.get(u.identity.as_ref()) == Some(&id))
    }

    /// Every current function unit with this surface name.
    pub fn overloads(&self, surface: &str) -> Vec<&UnitRecord> {
        self.units
            .iter()
            .enumerate()
            .filter(|(id, u)| {
                u.kind == DeclKind::Function && u.surface == surface && self.is_current(*id)
            })
            .map(|(_, u)| u)
            .collect()
    }

    /// Current units in binding order.
    pub fn current_units(&self) -> impl Iterator<Item = (UnitId, &UnitRecord)> {
        self.units
            .iter()
            .enumerate()
            .filter(|(id, _)| self.is_current(*id))
    }

    /// Number of units ever bound, current or detached.
    pub fn history_len(&self) -> usize {
        self.units.len()
    }

    /// Check a unit against the redeclaration rules without binding it.
    pub fn validate(&self, unit: &CompilationUnit, mode: Mode) -> Result<(), Rejection> {
        let identity_owner = self.owner(&unit.identity).map(|u| u.kind);
        let surface_owner = self.owner(&unit.surface).map(|u| u.kind);
        let decision = decide(identity_owner, surface_owner, unit.declaration.kind(), mode);
        trace!(
            "validate {} ({}): identity owner {:?}, surface owner {:?} -> {:?}",
            unit.surface,
            unit.identity,
            identity_owner,
            surface_owner,
            decision
        );
        match decision {
            Decision::Accept => Ok(()),
            _ => Err(Rejection {
                name: unit.surface.to_string(),
            }),
        }
    }

    /// Bind a validated unit under both its names, detaching any previous owner.
    pub fn bind(&mut self, unit: &CompilationUnit, input: u32) -> UnitId {
        let (sig, ty, mutable) = match &unit.declaration.body {
            DeclarationBody::Function { sig, .. } => (Some(sig.clone()), None, false),
            DeclarationBody::Variable { ty, mutable } => (None, Some(*ty), *mutable),
            DeclarationBody::TypeAlias { target } => (None, Some(*target), false),
        };
        let id = self.units.len();
        self.units.push(UnitRecord {
            identity: unit.identity.clone(),
            surface: unit.surface.clone(),
            kind: unit.declaration.kind(),
            sig,
            ty,
            mutable,
            input,
        });
        self.entries.insert(unit.identity.to_string(), id);
        self.entries.insert(unit.surface.to_string(), id);
        id
    }
}

impl PriorScope for Namespace {
    fn function_overloads(&self, surface: &str) -> Vec<FnSig> {
        self.overloads(surface)
            .into_iter()
            .filter_map(|u| u.sig.clone())
            .collect()
    }

    fn global(&self, name: &str) -> Option<GlobalInfo> {
        let unit = self.owner(name)?;
        match (unit.kind, unit.ty) {
            (DeclKind::Variable, Some(ty)) if unit.identity == name => Some(GlobalInfo {
                ty,
                mutable: unit.mutable,
            }),
            _ => None,
        }
    }

    fn type_alias(&self, name: &str) -> Option<Type> {
        let unit = self.owner(name)?;
        match unit.kind {
            DeclKind::TypeAlias => unit.ty,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::TypedDeclaration;
    use crate::names::mangle_function;
    use crate::typechecker::TBlock;

    use DeclKind::*;

    fn function(name: &str, sig: FnSig) -> CompilationUnit {
        let declaration = TypedDeclaration {
            name: SurfaceName::from(name),
            body: DeclarationBody::Function {
                params: vec!["p".to_string(); sig.params.len()],
                sig,
                body: TBlock::default(),
            },
            references: Vec::new(),
            span: (0, 0),
        };
        CompilationUnit::new(declaration, "__repl_2", Vec::new())
    }

    fn variable(name: &str) -> CompilationUnit {
        let declaration = TypedDeclaration {
            name: SurfaceName::from(name),
            body: DeclarationBody::Variable {
                ty: Type::Int,
                mutable: true,
            },
            references: Vec::new(),
            span: (0, 0),
        };
        CompilationUnit::new(declaration, "__repl_2", Vec::new())
    }

    fn int_to_int() -> FnSig {
        FnSig::new(vec![Type::Int], Type::Int)
    }

    #[test]
    fn decision_table() {
        let p = Mode::Permissive;
        let s = Mode::Strict;
        assert_eq!(decide(None, None, Function, p), Decision::Accept);
        assert_eq!(decide(None, None, Variable, s), Decision::Accept);
        assert_eq!(decide(Some(Variable), Some(Variable), Variable, p), Decision::RejectIdentityTaken);
        assert_eq!(decide(Some(TypeAlias), Some(TypeAlias), TypeAlias, p), Decision::RejectIdentityTaken);
        assert_eq!(decide(None, Some(Function), Variable, p), Decision::RejectSurfaceTaken);
        assert_eq!(decide(None, Some(Variable), Function, p), Decision::RejectSurfaceTaken);
        assert_eq!(decide(None, Some(Function), Function, p), Decision::Accept);
        assert_eq!(decide(None, Some(Function), Function, s), Decision::Accept);
        assert_eq!(decide(Some(Function), Some(Function), Function, p), Decision::Accept);
        assert_eq!(
            decide(Some(Function), Some(Function), Function, s),
            Decision::RejectStrictRedefinition
        );
    }

    #[test]
    fn identity_rule_precedes_surface_rule() {
        assert_eq!(
            decide(Some(Variable), Some(Function), Function, Mode::Permissive),
            Decision::RejectIdentityTaken
        );
    }

    #[test]
    fn redefining_a_function_replaces_it() {
        let mut ns = Namespace::new();
        let first = ns.bind(&function("f", int_to_int()), 2);
        let again = function("f", int_to_int());
        assert!(ns.validate(&again, Mode::Permissive).is_ok());
        let second = ns.bind(&again, 3);
        assert!(!ns.is_current(first));
        assert!(ns.is_current(second));
        assert_eq!(ns.owner("f").map(|u| u.input), Some(3));
        assert_eq!(ns.owner_id(&mangle_function("f", &int_to_int())), Some(second));
        assert_eq!(ns.history_len(), 2);
    }

    #[test]
    fn strict_mode_rejects_same_identity() {
        let mut ns = Namespace::new();
        ns.bind(&function("f", int_to_int()), 2);
        let err = ns
            .validate(&function("f", int_to_int()), Mode::Strict)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid redeclaration of `f`");
    }

    #[test]
    fn strict_mode_accepts_new_overload() {
        let mut ns = Namespace::new();
        ns.bind(&function("f", int_to_int()), 2);
        let overload = function("f", FnSig::new(vec![Type::Bool], Type::Int));
        assert!(ns.validate(&overload, Mode::Strict).is_ok());
        ns.bind(&overload, 3);
        assert_eq!(ns.overloads("f").len(), 2);
    }

    #[test]
    fn overloads_skip_replaced_units() {
        let mut ns = Namespace::new();
        ns.bind(&function("f", int_to_int()), 2);
        ns.bind(&function("f", int_to_int()), 3);
        let overloads = ns.overloads("f");
        assert_eq!(overloads.len(), 1);
        assert_eq!(overloads[0].input, 3);
    }

    #[test]
    fn variable_cannot_be_redeclared() {
        let mut ns = Namespace::new();
        ns.bind(&variable("x"), 2);
        assert!(ns.validate(&variable("x"), Mode::Permissive).is_err());
        assert!(ns.validate(&function("x", int_to_int()), Mode::Permissive).is_err());
    }

    #[test]
    fn variable_cannot_shadow_function() {
        let mut ns = Namespace::new();
        ns.bind(&function("f", int_to_int()), 2);
        assert!(ns.validate(&variable("f"), Mode::Permissive).is_err());
    }

    #[test]
    fn variable_named_like_a_mangled_identity_collides() {
        let mut ns = Namespace::new();
        ns.bind(&function("f", int_to_int()), 2);
        let id = mangle_function("f", &int_to_int());
        assert!(ns.validate(&variable(&id), Mode::Permissive).is_err());
    }

    #[test]
    fn prior_scope_view() {
        let mut ns = Namespace::new();
        ns.bind(&variable("x"), 2);
        ns.bind(&function("f", int_to_int()), 2);
        assert_eq!(
            ns.global("x"),
            Some(GlobalInfo {
                ty: Type::Int,
                mutable: true
            })
        );
        assert_eq!(ns.global("f"), None);
        assert_eq!(ns.function_overloads("f"), vec![int_to_int()]);
        assert_eq!(ns.type_alias("x"), None);
    }
}
