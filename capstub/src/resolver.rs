//! Scope resolver.
//!
//! Assigns every registered node its canonical names: the user-facing dotted
//! path, the leading-underscore protocol-class path, and the flat alias stem
//! used for module-level `type` aliases. Names that collide with Python
//! keywords or with pycapnp's runtime attributes are rewritten with a
//! trailing underscore; every rewrite lands in the alias table so callers
//! can still look a declaration up by its schema spelling.
//!
//! The resolver also derives the cross-module import edges consumed by the
//! writer's import block, and builds the generic-binding environments that
//! make two brands of one node two different type expressions.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use convert_case::{Case, Casing};

use crate::diagnostics::Diagnostic;
use crate::error::{GenerateError, GenerateResult};
use crate::model::{Brand, FieldKind, LoadedModule, Node, NodeId, NodeKind, TypeRef};
use crate::walker::{normalize, SchemaGraph};

/// Python keywords that cannot be used as attribute or class names.
const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import",
    "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while",
    "with", "yield",
];

/// Attribute names already taken by the pycapnp runtime classes the
/// generated Reader and Builder classes inherit from.
const RESERVED_MEMBERS: &[&str] = &[
    "struct",
    "list",
    "enum",
    "interface",
    "slot",
    "name",
    "schema",
    "which",
    "init",
    "as_builder",
    "as_reader",
];

/// Whether a name needs rewriting when used as a class-level declaration.
fn is_reserved_type_name(name: &str) -> bool {
    PYTHON_KEYWORDS.contains(&name)
}

/// Emitted TypeVar spelling for a generic parameter name.
pub(crate) fn type_var_spelling(raw: &str) -> String {
    if is_reserved_type_name(raw) {
        format!("{raw}_")
    } else {
        raw.to_owned()
    }
}

/// Whether a name needs rewriting when used as a property or attribute.
fn is_reserved_member_name(name: &str) -> bool {
    PYTHON_KEYWORDS.contains(&name) || RESERVED_MEMBERS.contains(&name)
}

/// Canonical names assigned to one node.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedName {
    /// Sanitized local name ("Inner", "Address" for groups).
    pub local: String,

    /// Dotted user-facing path from the module root ("Outer.Inner").
    pub user_path: String,

    /// Flat alias stem ("OuterInner").
    pub flat: String,

    /// Local protocol-class name ("_InnerModule").
    pub protocol_local: String,

    /// Dotted protocol-class path ("_OuterModule._InnerModule").
    pub protocol_path: String,

    /// Owning module spelling, normalized.
    pub module: PathBuf,
}

impl ResolvedName {
    /// Flat reader alias ("OuterInnerReader").
    pub fn reader_alias(&self) -> String {
        format!("{}Reader", self.flat)
    }

    /// Flat builder alias ("OuterInnerBuilder").
    pub fn builder_alias(&self) -> String {
        format!("{}Builder", self.flat)
    }

    /// Flat client alias for interfaces ("CalculatorClient").
    pub fn client_alias(&self) -> String {
        format!("{}Client", self.flat)
    }

    /// Flat server alias for interfaces ("CalculatorServer").
    pub fn server_alias(&self) -> String {
        format!("{}Server", self.flat)
    }

    /// Flat enum alias ("PersonKindEnum").
    pub fn enum_alias(&self) -> String {
        format!("{}Enum", self.flat)
    }

    /// Nested client class name inside the protocol class.
    pub fn client_local(&self) -> String {
        format!("{}Client", self.local)
    }
}

/// Generic bindings visible at one use site.
///
/// Keys pair the declaring node with the parameter index, so bindings for
/// different scopes never shadow each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrandEnv {
    bindings: BTreeMap<(NodeId, u16), TypeRef>,
}

impl BrandEnv {
    /// Environment produced by branding `target` at a use site.
    pub fn of(target: NodeId, brand: &Brand) -> Self {
        let mut bindings = BTreeMap::new();
        for (index, bound) in brand.bindings.iter().enumerate() {
            bindings.insert((target, index as u16), bound.clone());
        }
        Self { bindings }
    }

    /// The type bound for a parameter occurrence, if any.
    pub fn lookup(&self, scope: NodeId, index: u16) -> Option<&TypeRef> {
        self.bindings.get(&(scope, index))
    }

    /// Whether no parameter is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Frozen naming product of the resolve phase.
///
/// Read-only once built; writers for different modules share it freely.
#[derive(Debug, Default)]
pub struct NameTable {
    names: BTreeMap<NodeId, ResolvedName>,
    members: BTreeMap<(NodeId, String), String>,
    aliases: BTreeMap<PathBuf, BTreeMap<String, String>>,
    edges: BTreeMap<PathBuf, BTreeMap<PathBuf, BTreeSet<NodeId>>>,
    type_vars: BTreeMap<PathBuf, BTreeSet<String>>,
}

impl NameTable {
    /// Names assigned to a node, if it was reachable.
    pub fn name(&self, id: NodeId) -> Option<&ResolvedName> {
        self.names.get(&id)
    }

    /// Names that must exist, attributing failures to `module`.
    pub fn expect_name(&self, module: &Path, id: NodeId) -> GenerateResult<&ResolvedName> {
        self.names
            .get(&id)
            .ok_or_else(|| GenerateError::unresolved_node(module, id))
    }

    /// Emitted spelling for a member, falling back to the schema spelling.
    pub fn member_name<'a>(&'a self, id: NodeId, original: &'a str) -> &'a str {
        self.members
            .get(&(id, original.to_owned()))
            .map(String::as_str)
            .unwrap_or(original)
    }

    /// Look up the emitted path for an original schema path.
    ///
    /// Keys are the dotted schema spellings; values are the emitted dotted
    /// spellings after any reserved-name rewrites.
    pub fn resolve_original(&self, module: &Path, original: &str) -> Option<&str> {
        self.aliases
            .get(&normalize(module))
            .and_then(|table| table.get(original))
            .map(String::as_str)
    }

    /// Import edges for one consumer module: provider spelling to the set of
    /// referenced nodes. Never contains the consumer itself.
    pub fn edges_for(&self, module: &Path) -> impl Iterator<Item = (&Path, &BTreeSet<NodeId>)> {
        self.edges
            .get(&normalize(module))
            .into_iter()
            .flat_map(|providers| providers.iter().map(|(p, n)| (p.as_path(), n)))
    }

    /// TypeVar names a module must declare, in sorted order.
    pub fn type_vars_for(&self, module: &Path) -> impl Iterator<Item = &str> {
        self.type_vars
            .get(&normalize(module))
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

/// Name assignment over a frozen schema graph.
pub struct ScopeResolver<'g> {
    graph: &'g SchemaGraph,
}

impl<'g> ScopeResolver<'g> {
    /// Create a resolver over the given graph.
    pub fn new(graph: &'g SchemaGraph) -> Self {
        Self { graph }
    }

    /// Resolve names, aliases, import edges and TypeVars for all modules.
    pub fn resolve(
        &self,
        modules: &[LoadedModule],
    ) -> GenerateResult<(NameTable, Vec<Diagnostic>)> {
        let mut table = NameTable::default();
        let mut diagnostics = Vec::new();

        for module in modules {
            self.resolve_module(module, &mut table, &mut diagnostics)?;
        }
        self.resolve_foreign(&mut table);
        for module in modules {
            self.collect_edges(module, &mut table)?;
        }

        Ok((table, diagnostics))
    }

    fn resolve_module(
        &self,
        module: &LoadedModule,
        table: &mut NameTable,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> GenerateResult<()> {
        let module_path = normalize(&module.path);
        let root = self.graph.expect_node(&module.path, module.root_id)?;

        let mut flat_taken: HashSet<String> = HashSet::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        self.resolve_scope(
            module,
            root,
            None,
            &module_path,
            &mut flat_taken,
            &mut visited,
            table,
            diagnostics,
        )?;
        Ok(())
    }

    /// Depth-first name assignment for the children of one scope.
    #[allow(clippy::too_many_arguments)]
    fn resolve_scope(
        &self,
        module: &LoadedModule,
        scope: &Node,
        parent: Option<&ResolvedName>,
        module_path: &Path,
        flat_taken: &mut HashSet<String>,
        visited: &mut HashSet<NodeId>,
        table: &mut NameTable,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> GenerateResult<()> {
        let mut sibling_taken: HashSet<String> = HashSet::new();
        for (child_id, raw_name) in self.children_of(scope) {
            if !visited.insert(child_id) {
                continue;
            }
            let child = self.graph.expect_node(&module.path, child_id)?;

            let local = self.assign_local(
                module,
                parent,
                &raw_name,
                &mut sibling_taken,
                diagnostics,
                table,
                module_path,
            )?;

            let (user_path, protocol_path) = match parent {
                Some(p) => (
                    format!("{}.{}", p.user_path, local),
                    format!("{}._{}Module", p.protocol_path, local),
                ),
                None => (local.clone(), format!("_{local}Module")),
            };
            let flat_stem = match parent {
                Some(p) => format!("{}{}", p.flat, local),
                None => local.clone(),
            };
            let flat = self.assign_flat(module, &flat_stem, flat_taken, diagnostics, table)?;

            let resolved = ResolvedName {
                protocol_local: format!("_{local}Module"),
                local,
                user_path,
                flat,
                protocol_path,
                module: normalize(&child.module),
            };

            self.resolve_members(module, child, &resolved, table, diagnostics);
            self.collect_type_vars(child, module_path, table);

            table.names.insert(child_id, resolved.clone());
            self.resolve_scope(
                module,
                child,
                Some(&resolved),
                module_path,
                flat_taken,
                visited,
                table,
                diagnostics,
            )?;
        }
        Ok(())
    }

    /// Children of a scope with their raw (pre-sanitization) names, in
    /// declaration order: nested types, then field groups, then method
    /// parameter and result structs.
    fn children_of(&self, scope: &Node) -> Vec<(NodeId, String)> {
        let mut children: Vec<(NodeId, String)> = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();

        for &id in &scope.nested {
            if seen.insert(id) {
                let name = self
                    .graph
                    .node(id)
                    .map(|n| n.name.clone())
                    .unwrap_or_default();
                children.push((id, name));
            }
        }
        match &scope.kind {
            NodeKind::Struct(s) => {
                for field in &s.fields {
                    if let FieldKind::Group { type_id } = field.kind {
                        if seen.insert(type_id) {
                            children.push((type_id, field.name.to_case(Case::Pascal)));
                        }
                    }
                }
            }
            NodeKind::Interface(i) => {
                for method in &i.methods {
                    let stem = method.name.to_case(Case::Pascal);
                    if seen.insert(method.param_struct) {
                        let name = self.named_or(method.param_struct, format!("{stem}Params"));
                        children.push((method.param_struct, name));
                    }
                    if seen.insert(method.result_struct) {
                        let name = self.named_or(method.result_struct, format!("{stem}Results"));
                        children.push((method.result_struct, name));
                    }
                }
            }
            _ => {}
        }
        children
    }

    fn named_or(&self, id: NodeId, fallback: String) -> String {
        match self.graph.node(id) {
            Some(node) if !node.name.is_empty() => node.name.clone(),
            _ => fallback,
        }
    }

    /// Sanitize and de-collide a local name within its sibling set.
    #[allow(clippy::too_many_arguments)]
    fn assign_local(
        &self,
        module: &LoadedModule,
        parent: Option<&ResolvedName>,
        raw: &str,
        sibling_taken: &mut HashSet<String>,
        diagnostics: &mut Vec<Diagnostic>,
        table: &mut NameTable,
        module_path: &Path,
    ) -> GenerateResult<String> {
        let mut candidate = if is_reserved_type_name(raw) {
            format!("{raw}_")
        } else {
            raw.to_owned()
        };
        if !sibling_taken.insert(candidate.clone()) {
            candidate = self.retry_name(module, &candidate, sibling_taken)?;
        }
        if candidate != raw {
            let original_path = joined_path(parent.map(|p| p.user_path.as_str()), raw);
            let emitted_path = joined_path(parent.map(|p| p.user_path.as_str()), &candidate);
            diagnostics.push(Diagnostic::reserved_name_rename(
                &module.path,
                &original_path,
                &emitted_path,
            ));
            table
                .aliases
                .entry(module_path.to_path_buf())
                .or_default()
                .insert(original_path, emitted_path);
        }
        Ok(candidate)
    }

    /// De-collide a flat alias stem across the whole module.
    fn assign_flat(
        &self,
        module: &LoadedModule,
        stem: &str,
        flat_taken: &mut HashSet<String>,
        diagnostics: &mut Vec<Diagnostic>,
        table: &mut NameTable,
    ) -> GenerateResult<String> {
        if flat_taken.insert(stem.to_owned()) {
            return Ok(stem.to_owned());
        }
        let renamed = self.retry_name(module, stem, flat_taken)?;
        diagnostics.push(Diagnostic::reserved_name_rename(&module.path, stem, &renamed));
        table
            .aliases
            .entry(normalize(&module.path))
            .or_default()
            .insert(stem.to_owned(), renamed.clone());
        Ok(renamed)
    }

    /// Retry with a trailing underscore, then numeric suffixes.
    fn retry_name(
        &self,
        module: &LoadedModule,
        base: &str,
        taken: &mut HashSet<String>,
    ) -> GenerateResult<String> {
        let underscored = format!("{base}_");
        if taken.insert(underscored.clone()) {
            return Ok(underscored);
        }
        for n in 2..10 {
            let numbered = format!("{base}_{n}");
            if taken.insert(numbered.clone()) {
                return Ok(numbered);
            }
        }
        Err(GenerateError::name_collision(&module.path, base))
    }

    /// Sanitize member names (fields, enumerants) and record rewrites.
    fn resolve_members(
        &self,
        module: &LoadedModule,
        node: &Node,
        resolved: &ResolvedName,
        table: &mut NameTable,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let member_names: Vec<String> = match &node.kind {
            NodeKind::Struct(s) => s.fields.iter().map(|f| f.name.clone()).collect(),
            NodeKind::Enum(e) => e.enumerants.clone(),
            NodeKind::Interface(i) => i.methods.iter().map(|m| m.name.clone()).collect(),
            _ => return,
        };

        for original in member_names {
            if !is_reserved_member_name(&original) {
                continue;
            }
            let emitted = format!("{original}_");
            let original_path = format!("{}.{}", resolved.user_path, original);
            let emitted_path = format!("{}.{}", resolved.user_path, emitted);
            diagnostics.push(Diagnostic::reserved_name_rename(
                &module.path,
                &original_path,
                &emitted_path,
            ));
            table
                .aliases
                .entry(resolved.module.clone())
                .or_default()
                .insert(original_path, emitted_path);
            table.members.insert((node.id, original), emitted);
        }
    }

    fn collect_type_vars(&self, node: &Node, module_path: &Path, table: &mut NameTable) {
        for param in node.generic_params() {
            table
                .type_vars
                .entry(module_path.to_path_buf())
                .or_default()
                .insert(type_var_spelling(param));
        }
    }

    /// Name nodes owned by modules outside the requested set.
    ///
    /// Their stubs come from a different run, so only the names matter here:
    /// the import block needs the provider's alias spellings, which this
    /// reproduces with the same chaining rules the provider's own resolve
    /// would apply.
    fn resolve_foreign(&self, table: &mut NameTable) {
        let unnamed: Vec<NodeId> = self
            .graph
            .ids()
            .filter(|id| !table.names.contains_key(id))
            .collect();
        for id in unnamed {
            if let Some(node) = self.graph.node(id) {
                if !node.is_file() {
                    self.name_foreign_chain(node, table);
                }
            }
        }
    }

    fn name_foreign_chain(&self, node: &Node, table: &mut NameTable) -> Option<ResolvedName> {
        if let Some(existing) = table.names.get(&node.id) {
            return Some(existing.clone());
        }
        if node.is_file() {
            return None;
        }

        let parent = node
            .parent
            .and_then(|pid| self.graph.node(pid))
            .and_then(|p| self.name_foreign_chain(p, table));

        let raw = self.foreign_raw_name(node);
        let local = if is_reserved_type_name(&raw) {
            format!("{raw}_")
        } else {
            raw
        };
        let (user_path, protocol_path, flat) = match &parent {
            Some(p) => (
                format!("{}.{}", p.user_path, local),
                format!("{}._{}Module", p.protocol_path, local),
                format!("{}{}", p.flat, local),
            ),
            None => (local.clone(), format!("_{local}Module"), local.clone()),
        };
        let resolved = ResolvedName {
            protocol_local: format!("_{local}Module"),
            local,
            user_path,
            flat,
            protocol_path,
            module: normalize(&node.module),
        };
        table.names.insert(node.id, resolved.clone());
        Some(resolved)
    }

    /// Raw name for a foreign node, synthesizing group and method-struct
    /// names from the enclosing declaration when the node itself is unnamed.
    fn foreign_raw_name(&self, node: &Node) -> String {
        if !node.name.is_empty() {
            return node.name.clone();
        }
        let parent = node.parent.and_then(|pid| self.graph.node(pid));
        if let Some(parent) = parent {
            match &parent.kind {
                NodeKind::Struct(s) => {
                    for field in &s.fields {
                        if field.group_id() == Some(node.id) {
                            return field.name.to_case(Case::Pascal);
                        }
                    }
                }
                NodeKind::Interface(i) => {
                    for method in &i.methods {
                        let stem = method.name.to_case(Case::Pascal);
                        if method.param_struct == node.id {
                            return format!("{stem}Params");
                        }
                        if method.result_struct == node.id {
                            return format!("{stem}Results");
                        }
                    }
                }
                _ => {}
            }
        }
        format!("Node{:x}", node.id.0)
    }

    /// Record one edge per (consumer, provider) pair covering every foreign
    /// node the consumer's declarations reference.
    fn collect_edges(&self, module: &LoadedModule, table: &mut NameTable) -> GenerateResult<()> {
        let consumer = normalize(&module.path);
        let mut foreign: BTreeMap<PathBuf, BTreeSet<NodeId>> = BTreeMap::new();

        for id in table.names.keys() {
            let Some(node) = self.graph.node(*id) else {
                continue;
            };
            if normalize(&node.module) != consumer {
                continue;
            }
            let mut targets = Vec::new();
            collect_node_targets(node, &mut targets);
            for target in targets {
                let target_node = self.graph.expect_node(&module.path, target)?;
                let provider = normalize(&target_node.module);
                if provider != consumer {
                    foreign.entry(provider).or_default().insert(target);
                }
            }
        }

        if !foreign.is_empty() {
            table.edges.insert(consumer, foreign);
        }
        Ok(())
    }
}

fn joined_path(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) => format!("{parent}.{name}"),
        None => name.to_owned(),
    }
}

/// Node ids referenced by one node's declarations.
fn collect_node_targets(node: &Node, out: &mut Vec<NodeId>) {
    match &node.kind {
        NodeKind::Struct(s) => {
            for field in &s.fields {
                if let Some(type_ref) = field.slot_type() {
                    collect_ref_targets(type_ref, out);
                }
            }
        }
        NodeKind::Interface(i) => {
            out.extend(i.superclasses.iter().copied());
        }
        NodeKind::Const(c) => collect_ref_targets(&c.type_ref, out),
        _ => {}
    }
}

fn collect_ref_targets(type_ref: &TypeRef, out: &mut Vec<NodeId>) {
    match type_ref {
        TypeRef::List { element } => collect_ref_targets(element, out),
        TypeRef::Enum { target } => out.push(*target),
        TypeRef::Struct { target, brand } | TypeRef::Interface { target, brand } => {
            out.push(*target);
            for binding in &brand.bindings {
                collect_ref_targets(binding, out);
            }
        }
        _ => {}
    }
}

/// Relative Python module path from one stub to another.
///
/// One leading dot per directory hop, starting at the consumer's package:
/// same directory yields `.common_capnp`, one level up `..common_capnp`, a
/// sibling directory `..inc.common_capnp`.
pub fn relative_import(consumer: &Path, provider: &Path) -> String {
    let consumer_dir: Vec<_> = normalize(consumer)
        .parent()
        .map(|p| p.components().map(|c| c.as_os_str().to_owned()).collect())
        .unwrap_or_default();
    let provider_path = normalize(provider);
    let provider_dir: Vec<_> = provider_path
        .parent()
        .map(|p| p.components().map(|c| c.as_os_str().to_owned()).collect())
        .unwrap_or_default();

    let shared = consumer_dir
        .iter()
        .zip(provider_dir.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let dots = 1 + consumer_dir.len() - shared;
    let mut rendered = ".".repeat(dots);
    for segment in &provider_dir[shared..] {
        rendered.push_str(&segment.to_string_lossy());
        rendered.push('.');
    }
    rendered.push_str(&crate::model::stub_stem(&provider_path));
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnumNode, Field, InterfaceNode, Method, StructNode};
    use crate::walker::SchemaWalker;

    fn resolve(modules: Vec<LoadedModule>) -> (NameTable, Vec<Diagnostic>) {
        let graph = SchemaWalker::new(vec![]).walk(&modules).unwrap();
        ScopeResolver::new(&graph).resolve(&modules).unwrap()
    }

    fn file_node(id: u64, module: &str, nested: Vec<u64>) -> Node {
        Node::new(id, "", module, NodeKind::File)
            .with_nested(nested.into_iter().map(NodeId).collect())
    }

    #[test]
    fn test_nested_names_chain_through_scopes() {
        let modules = vec![LoadedModule::new(
            1,
            "shapes.capnp",
            vec![
                file_node(1, "shapes.capnp", vec![16]),
                Node::new(
                    16,
                    "Outer",
                    "shapes.capnp",
                    NodeKind::Struct(StructNode::new(vec![])),
                )
                .with_parent(1)
                .with_nested(vec![NodeId(17)]),
                Node::new(
                    17,
                    "Inner",
                    "shapes.capnp",
                    NodeKind::Struct(StructNode::new(vec![])),
                )
                .with_parent(16),
            ],
        )];

        let (table, diags) = resolve(modules);
        let inner = table.name(NodeId(17)).unwrap();
        assert_eq!(inner.user_path, "Outer.Inner");
        assert_eq!(inner.protocol_path, "_OuterModule._InnerModule");
        assert_eq!(inner.flat, "OuterInner");
        assert_eq!(inner.reader_alias(), "OuterInnerReader");
        assert!(diags.is_empty());
    }

    #[test]
    fn test_qualified_names_are_unique_per_module() {
        // "Outer.Inner" flattens to the same stem as a sibling named
        // "OuterInner"; the second comer gets a suffix.
        let modules = vec![LoadedModule::new(
            1,
            "clash.capnp",
            vec![
                file_node(1, "clash.capnp", vec![16, 18]),
                Node::new(
                    16,
                    "Outer",
                    "clash.capnp",
                    NodeKind::Struct(StructNode::new(vec![])),
                )
                .with_parent(1)
                .with_nested(vec![NodeId(17)]),
                Node::new(
                    17,
                    "Inner",
                    "clash.capnp",
                    NodeKind::Struct(StructNode::new(vec![])),
                )
                .with_parent(16),
                Node::new(
                    18,
                    "OuterInner",
                    "clash.capnp",
                    NodeKind::Struct(StructNode::new(vec![])),
                )
                .with_parent(1),
            ],
        )];

        let (table, diags) = resolve(modules);
        let mut flats: Vec<String> = [16u64, 17, 18]
            .iter()
            .map(|id| table.name(NodeId(*id)).unwrap().flat.clone())
            .collect();
        flats.sort();
        flats.dedup();
        assert_eq!(flats.len(), 3, "flat aliases must stay distinct");
        assert!(!diags.is_empty(), "the collision is reported");
    }

    #[test]
    fn test_sanitized_names_round_trip_through_alias_table() {
        let modules = vec![LoadedModule::new(
            1,
            "config.capnp",
            vec![
                file_node(1, "config.capnp", vec![16]),
                Node::new(
                    16,
                    "Config",
                    "config.capnp",
                    NodeKind::Struct(StructNode::new(vec![
                        Field::slot("import", TypeRef::Text),
                        Field::slot("schema", TypeRef::Text),
                    ])),
                )
                .with_parent(1),
            ],
        )];

        let (table, diags) = resolve(modules);
        assert_eq!(
            table.resolve_original(Path::new("config.capnp"), "Config.import"),
            Some("Config.import_")
        );
        assert_eq!(
            table.resolve_original(Path::new("config.capnp"), "Config.schema"),
            Some("Config.schema_")
        );
        assert_eq!(table.member_name(NodeId(16), "import"), "import_");
        assert_eq!(table.member_name(NodeId(16), "schema"), "schema_");
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn test_group_names_capitalize_the_field() {
        let modules = vec![LoadedModule::new(
            1,
            "person.capnp",
            vec![
                file_node(1, "person.capnp", vec![16]),
                Node::new(
                    16,
                    "Person",
                    "person.capnp",
                    NodeKind::Struct(StructNode::new(vec![Field::group("homeAddress", 17)])),
                )
                .with_parent(1),
                Node::new(
                    17,
                    "",
                    "person.capnp",
                    NodeKind::Struct(
                        StructNode::new(vec![Field::slot("street", TypeRef::Text)])
                            .with_group(true),
                    ),
                )
                .with_parent(16),
            ],
        )];

        let (table, _) = resolve(modules);
        let group = table.name(NodeId(17)).unwrap();
        assert_eq!(group.local, "HomeAddress");
        assert_eq!(group.user_path, "Person.HomeAddress");
        assert_eq!(group.protocol_path, "_PersonModule._HomeAddressModule");
    }

    #[test]
    fn test_method_structs_get_synthesized_names() {
        let modules = vec![LoadedModule::new(
            1,
            "calc.capnp",
            vec![
                file_node(1, "calc.capnp", vec![32]),
                Node::new(
                    32,
                    "Calculator",
                    "calc.capnp",
                    NodeKind::Interface(InterfaceNode::new(vec![Method::new("evaluate", 33, 34)])),
                )
                .with_parent(1),
                Node::new(33, "", "calc.capnp", NodeKind::Struct(StructNode::new(vec![])))
                    .with_parent(32),
                Node::new(34, "", "calc.capnp", NodeKind::Struct(StructNode::new(vec![])))
                    .with_parent(32),
            ],
        )];

        let (table, _) = resolve(modules);
        assert_eq!(table.name(NodeId(33)).unwrap().local, "EvaluateParams");
        assert_eq!(table.name(NodeId(34)).unwrap().local, "EvaluateResults");
        assert_eq!(
            table.name(NodeId(34)).unwrap().user_path,
            "Calculator.EvaluateResults"
        );
    }

    #[test]
    fn test_import_edges_skip_self_and_group_foreign() {
        let common_nodes = vec![
            file_node(9, "common.capnp", vec![90, 91]),
            Node::new(
                90,
                "Date",
                "common.capnp",
                NodeKind::Struct(StructNode::new(vec![Field::slot("year", TypeRef::Int16)])),
            )
            .with_parent(9),
            Node::new(
                91,
                "Color",
                "common.capnp",
                NodeKind::Enum(EnumNode::new(vec!["red", "green"])),
            )
            .with_parent(9),
        ];
        let mut a_nodes = vec![
            file_node(1, "a.capnp", vec![10, 11]),
            Node::new(
                10,
                "Event",
                "a.capnp",
                NodeKind::Struct(StructNode::new(vec![
                    Field::slot("when", TypeRef::struct_ref(90)),
                    Field::slot("tint", TypeRef::enum_ref(91)),
                    Field::slot("next", TypeRef::struct_ref(11)),
                ])),
            )
            .with_parent(1),
            Node::new(
                11,
                "Marker",
                "a.capnp",
                NodeKind::Struct(StructNode::new(vec![])),
            )
            .with_parent(1),
        ];
        a_nodes.extend(common_nodes.clone());

        let modules = vec![
            LoadedModule::new(1, "a.capnp", a_nodes).with_imports(vec!["common.capnp"]),
            LoadedModule::new(9, "common.capnp", common_nodes),
        ];

        let (table, _) = resolve(modules);
        let edges: Vec<_> = table.edges_for(Path::new("a.capnp")).collect();
        assert_eq!(edges.len(), 1);
        let (provider, nodes) = &edges[0];
        assert_eq!(*provider, Path::new("common.capnp"));
        assert!(nodes.contains(&NodeId(90)));
        assert!(nodes.contains(&NodeId(91)));
        assert!(!nodes.contains(&NodeId(11)), "self references are not edges");
        assert!(table.edges_for(Path::new("common.capnp")).next().is_none());
    }

    #[test]
    fn test_unloaded_provider_nodes_still_get_names() {
        // The provider module is only embedded, not requested; its stub is
        // assumed to exist from another run. Names must still resolve so the
        // import block can spell the aliases.
        let dir = tempfile::tempdir().unwrap();
        let a_path = dir.path().join("a.capnp");
        std::fs::write(dir.path().join("common.capnp"), "").unwrap();
        let common_spelling = dir.path().join("common.capnp");

        let modules = vec![LoadedModule::new(
            1,
            &a_path,
            vec![
                file_node(1, a_path.to_str().unwrap(), vec![10]),
                Node::new(
                    10,
                    "Event",
                    &a_path,
                    NodeKind::Struct(StructNode::new(vec![Field::slot(
                        "when",
                        TypeRef::struct_ref(90),
                    )])),
                )
                .with_parent(1),
                Node::new(
                    90,
                    "Date",
                    &common_spelling,
                    NodeKind::Struct(StructNode::new(vec![Field::slot("year", TypeRef::Int16)])),
                )
                .with_parent(9),
                Node::new(9, "", &common_spelling, NodeKind::File)
                    .with_nested(vec![NodeId(90)]),
            ],
        )
        .with_imports(vec!["common.capnp"])];

        let (table, _) = resolve(modules);
        let date = table.name(NodeId(90)).unwrap();
        assert_eq!(date.flat, "Date");
        assert_eq!(date.reader_alias(), "DateReader");
        let edges: Vec<_> = table.edges_for(&a_path).collect();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_brand_env_binds_positionally() {
        let brand = Brand::new(vec![TypeRef::Text, TypeRef::UInt32]);
        let env = BrandEnv::of(NodeId(5), &brand);
        assert_eq!(env.lookup(NodeId(5), 0), Some(&TypeRef::Text));
        assert_eq!(env.lookup(NodeId(5), 1), Some(&TypeRef::UInt32));
        assert_eq!(env.lookup(NodeId(5), 2), None);
        assert_eq!(env.lookup(NodeId(6), 0), None);
    }

    #[test]
    fn test_relative_import_rendering() {
        assert_eq!(
            relative_import(Path::new("a.capnp"), Path::new("common.capnp")),
            ".common_capnp"
        );
        assert_eq!(
            relative_import(Path::new("sub/a.capnp"), Path::new("common.capnp")),
            "..common_capnp"
        );
        assert_eq!(
            relative_import(Path::new("app/a.capnp"), Path::new("inc/common.capnp")),
            "..inc.common_capnp"
        );
        assert_eq!(
            relative_import(Path::new("x/y/a.capnp"), Path::new("x/y/z/c.capnp")),
            ".z.c_capnp"
        );
    }

    #[test]
    fn test_type_vars_are_collected_sorted() {
        let modules = vec![LoadedModule::new(
            1,
            "generic.capnp",
            vec![
                file_node(1, "generic.capnp", vec![16]),
                Node::new(
                    16,
                    "Cache",
                    "generic.capnp",
                    NodeKind::Struct(
                        StructNode::new(vec![])
                            .with_generic_params(vec!["Value".into(), "Key".into()]),
                    ),
                )
                .with_parent(1),
            ],
        )];

        let (table, _) = resolve(modules);
        let vars: Vec<_> = table.type_vars_for(Path::new("generic.capnp")).collect();
        assert_eq!(vars, vec!["Key", "Value"]);
    }
}
