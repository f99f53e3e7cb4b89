use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

use crate::types::{FnSig, Type};

// ── Name newtypes ─────────────────────────────────────────────────────────

/// Implement common traits for a String newtype wrapper:
/// Deref<Target=str>, Borrow<str>, From<String>, From<&str>,
/// AsRef<str>, PartialEq<str>, PartialEq<&str>, Display.
macro_rules! string_newtype {
    ($name:ident) => {
        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

/// The user-visible (unmangled) name of a declaration.
/// Examples: `"add"`, `"x"`, `"__repl_3"`, `"$R3"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceName(pub String);
string_newtype!(SurfaceName);

/// The canonical linking key of a declaration.
/// Functions use a signature-derived mangling (`_S3addFii_i`); every other
/// declaration kind uses its surface name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityName(pub String);
string_newtype!(IdentityName);

// ── Mangling ──────────────────────────────────────────────────────────────

const MANGLE_PREFIX: &str = "_S";

/// Mangle a function name and signature into its identity name.
///
/// Layout: `_S<len><name>F<param codes>_<return code>`.
pub fn mangle_function(name: &str, sig: &FnSig) -> IdentityName {
    let mut out = format!("{}{}{}F", MANGLE_PREFIX, name.len(), name);
    for p in &sig.params {
        out.push(p.mangle_code());
    }
    out.push('_');
    out.push(sig.ret.mangle_code());
    IdentityName(out)
}

/// Recover the surface name and signature from a function identity name.
/// Returns None for anything that is not a well-formed function identity.
pub fn demangle_function(identity: &str) -> Option<(SurfaceName, FnSig)> {
    let rest = identity.strip_prefix(MANGLE_PREFIX)?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let len: usize = rest[..digits].parse().ok()?;
    let rest = &rest[digits..];
    let name = rest.get(..len)?;
    let rest = rest[len..].strip_prefix('F')?;
    let (params, ret) = rest.split_once('_')?;
    let params = params
        .chars()
        .map(Type::from_mangle_code)
        .collect::<Option<Vec<_>>>()?;
    let mut ret_chars = ret.chars();
    let ret = Type::from_mangle_code(ret_chars.next()?)?;
    if ret_chars.next().is_some() || params.contains(&Type::Void) {
        return None;
    }
    Some((SurfaceName(name.to_string()), FnSig::new(params, ret)))
}

/// Whether a symbol is the identity of a session-defined function.
pub fn is_function_identity(symbol: &str) -> bool {
    demangle_function(symbol).is_some()
}

// ── Synthetic per-input names ─────────────────────────────────────────────

/// Prefix of every input's entry function. User declarations may not use it.
pub const ENTRY_PREFIX: &str = "__repl_";

/// Synthetic module name of the N-th input; also the entry function's surface name.
pub fn input_module_name(input_number: u32) -> String {
    format!("{}{}", ENTRY_PREFIX, input_number)
}

/// Whether a user declaration named `name` would collide with an entry function.
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with(ENTRY_PREFIX)
}

/// Name of the variable receiving the value of an input's final expression.
pub fn result_variable_name(input_number: u32) -> String {
    format!("$R{}", input_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangle_encodes_signature() {
        let sig = FnSig::new(vec![Type::Int, Type::Bool], Type::Int);
        assert_eq!(mangle_function("add", &sig), "_S3addFib_i");
        let entry = FnSig::new(vec![], Type::Void);
        assert_eq!(mangle_function("__repl_2", &entry), "_S8__repl_2F_v");
    }

    #[test]
    fn overloads_get_distinct_identities() {
        let a = mangle_function("f", &FnSig::new(vec![Type::Int], Type::Int));
        let b = mangle_function("f", &FnSig::new(vec![Type::Bool], Type::Int));
        assert_ne!(a, b);
    }

    #[test]
    fn demangle_recovers_name_and_signature() {
        let sig = FnSig::new(vec![Type::Int, Type::Int], Type::Bool);
        let id = mangle_function("less_than", &sig);
        let (name, back) = demangle_function(&id).unwrap();
        assert_eq!(name, "less_than");
        assert_eq!(back, sig);
    }

    #[test]
    fn name_containing_digits_and_separator() {
        let sig = FnSig::new(vec![], Type::Int);
        let id = mangle_function("f_1F_2", &sig);
        assert_eq!(demangle_function(&id).unwrap().0, "f_1F_2");
    }

    #[test]
    fn non_identities_are_rejected() {
        assert!(!is_function_identity("x"));
        assert!(!is_function_identity("splice_print_int"));
        assert!(!is_function_identity("_S"));
        assert!(!is_function_identity("_S9fF_i"));
        assert!(!is_function_identity("_S1fFq_i"));
        assert!(!is_function_identity("_S1fF_ii"));
        assert!(!is_function_identity("_S1fFv_i"));
    }
}
