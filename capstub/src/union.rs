//! Union and discriminant synthesis.
//!
//! A struct's union surfaces as a `which()` selector typed as a closed
//! `Literal[...]` over the member branch names in declaration order. Fields
//! carrying the discriminant-none sentinel stay out of the selector. Groups
//! holding their own union get their own selector on the group class, which
//! is how nested unions flatten without losing their scope.

use std::path::Path;

use crate::diagnostics::Diagnostic;
use crate::model::{FieldKind, StructNode};

/// The synthesized selector for one struct's union.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionSelector {
    /// Branch names as written in the schema, declaration order.
    pub branches: Vec<String>,
}

impl UnionSelector {
    /// The closed literal type covering exactly the branches.
    pub fn literal(&self) -> String {
        let quoted: Vec<String> = self
            .branches
            .iter()
            .map(|b| format!("\"{}\"", escape(b)))
            .collect();
        format!("Literal[{}]", quoted.join(", "))
    }
}

/// Build the selector for a struct, or `None` when it has no union.
pub fn selector_for(node: &StructNode) -> Option<UnionSelector> {
    if !node.has_union() {
        return None;
    }
    let branches: Vec<String> = node.union_fields().map(|f| f.name.clone()).collect();
    Some(UnionSelector { branches })
}

/// Diagnostics for union-branch defaults the stub cannot express.
///
/// A property signature has no place for a default value, so the deviation
/// is recorded instead of silently dropped.
pub fn default_deviations(module: &Path, user_path: &str, node: &StructNode) -> Vec<Diagnostic> {
    let mut found = Vec::new();
    for field in node.union_fields() {
        if let FieldKind::Slot {
            had_explicit_default: true,
            ..
        } = field.kind
        {
            found.push(Diagnostic::default_value_deviation(
                module,
                format!("{user_path}.{}", field.name),
            ));
        }
    }
    found
}

fn escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}
