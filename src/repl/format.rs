use std::fmt;

use crate::frontend::DeclKind;
use crate::indirection::SlotTable;
use crate::namespace::Namespace;
use crate::types::Type;

/// A variable of an executed input and its value after the entry ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub ty: Type,
    pub value: i64,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} = {}", self.name, self.ty, self.ty.format_value(self.value))
    }
}

/// `/list`: one line per current unit, in binding order.
pub fn format_namespace(namespace: &Namespace) -> String {
    let mut lines = Vec::new();
    for (_, unit) in namespace.current_units() {
        let detail = match unit.kind {
            DeclKind::Function => unit
                .sig
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_default(),
            DeclKind::Variable => {
                let ty = unit.ty.map(|t| t.to_string()).unwrap_or_default();
                if unit.mutable {
                    format!("var {}", ty)
                } else {
                    format!("let {}", ty)
                }
            }
            DeclKind::TypeAlias => unit.ty.map(|t| format!("= {}", t)).unwrap_or_default(),
        };
        lines.push(format!(
            "{:<9} {:<16} {:<24} {:<20} #{}",
            unit.kind.to_string(),
            unit.surface.as_ref(),
            unit.identity.as_ref(),
            detail,
            unit.input
        ));
    }
    if lines.is_empty() {
        "; no declarations".to_string()
    } else {
        lines.join("\n")
    }
}

/// `/slots`: every pointer slot and what it holds.
pub fn format_slots(slots: &SlotTable) -> String {
    if slots.is_empty() {
        return "; no slots".to_string();
    }
    slots
        .entries()
        .into_iter()
        .map(|(name, value)| {
            if value == 0 {
                format!("{:<24} null", name)
            } else {
                format!("{:<24} {:#x}", name, value)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
