use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Bool,
    Void,
}

impl Type {
    /// Single-character code used in identity names.
    pub fn mangle_code(self) -> char {
        match self {
            Type::Int => 'i',
            Type::Bool => 'b',
            Type::Void => 'v',
        }
    }

    pub fn from_mangle_code(code: char) -> Option<Type> {
        match code {
            'i' => Some(Type::Int),
            'b' => Some(Type::Bool),
            'v' => Some(Type::Void),
            _ => None,
        }
    }

    /// Whether values of this type occupy a machine word.
    pub fn has_value(self) -> bool {
        self != Type::Void
    }

    /// Render a raw machine word of this type for display.
    pub fn format_value(self, raw: i64) -> String {
        match self {
            Type::Int => raw.to_string(),
            Type::Bool => (raw != 0).to_string(),
            Type::Void => "()".to_string(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "Int"),
            Type::Bool => write!(f, "Bool"),
            Type::Void => write!(f, "Void"),
        }
    }
}

/// Signature of a function declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnSig {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl FnSig {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        FnSig { params, ret }
    }
}

impl fmt::Display for FnSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}
