//! Schema walker.
//!
//! Enumerates every node reachable from the root of each loaded module into
//! a shared write-once registry keyed by node id. Reachability follows
//! nested declarations, enclosing scopes, field and method types, generic
//! brand bindings, and interface superclasses. Modules are walked
//! concurrently; the first walker
//! to register an id wins and later discoveries of the same id are no-ops,
//! so modules that share an import overlap cleanly.
//!
//! The walker also resolves declared imports: relative imports against the
//! importing module's directory, absolute imports (leading `/`) against the
//! caller-supplied import roots, in order. An import that resolves under no
//! root is fatal for the run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{GenerateError, GenerateResult};
use crate::model::{FieldKind, LoadedModule, Node, NodeId, NodeKind, TypeRef};

/// Reachability walker over a set of loaded modules.
pub struct SchemaWalker {
    import_roots: Vec<PathBuf>,
}

impl SchemaWalker {
    /// Create a walker resolving absolute imports against the given roots.
    pub fn new(import_roots: Vec<PathBuf>) -> Self {
        Self { import_roots }
    }

    /// Walk all modules and freeze the merged registry.
    pub fn walk(&self, modules: &[LoadedModule]) -> GenerateResult<SchemaGraph> {
        let known: BTreeSet<PathBuf> = modules.iter().map(|m| normalize(&m.path)).collect();
        let shared = Mutex::new(RegistryInner::default());

        let results: Vec<GenerateResult<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = modules
                .iter()
                .map(|module| {
                    let known = &known;
                    let shared = &shared;
                    scope.spawn(move || self.walk_module(module, known, shared))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        });

        // Surface the first failure in input order so reruns are stable.
        for result in results {
            result?;
        }

        let inner = match shared.into_inner() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(SchemaGraph {
            nodes: inner.nodes,
            locations: inner.locations,
        })
    }

    fn walk_module(
        &self,
        module: &LoadedModule,
        known: &BTreeSet<PathBuf>,
        shared: &Mutex<RegistryInner>,
    ) -> GenerateResult<()> {
        let local: HashMap<NodeId, &Node> = module.nodes.iter().map(|n| (n.id, n)).collect();
        let module_path = normalize(&module.path);

        {
            let mut inner = lock(shared);
            inner
                .locations
                .entry(module_path.clone())
                .or_insert_with(|| module_path.clone());
        }

        for import in &module.imports {
            let resolved = self.resolve_import(&module.path, import, known)?;
            let spelling = import_spelling(&module.path, import);
            lock(shared).locations.entry(spelling).or_insert(resolved);
        }

        let mut stack = vec![module.root_id];
        while let Some(id) = stack.pop() {
            let node = match local.get(&id) {
                Some(node) => *node,
                None => {
                    // May already be registered through another module's walk.
                    if lock(shared).nodes.contains_key(&id) {
                        continue;
                    }
                    return Err(GenerateError::unresolved_node(&module.path, id));
                }
            };

            let newly_registered = {
                let mut inner = lock(shared);
                self.ensure_location(&mut inner, &module.path, &node.module, known)?;
                if inner.nodes.contains_key(&id) {
                    false
                } else {
                    inner.nodes.insert(id, node.clone());
                    true
                }
            };
            if !newly_registered {
                continue;
            }

            stack.extend(node.nested.iter().copied());
            // Imported nodes arrive without their file scope on the walk
            // path; pull the parent chain in so qualified names resolve.
            if let Some(parent) = node.parent {
                stack.push(parent);
            }
            match &node.kind {
                NodeKind::File => {}
                NodeKind::Struct(s) => {
                    for field in &s.fields {
                        match &field.kind {
                            FieldKind::Slot { type_ref, .. } => {
                                collect_type_targets(type_ref, &mut stack)
                            }
                            FieldKind::Group { type_id } => stack.push(*type_id),
                        }
                    }
                }
                NodeKind::Enum(_) => {}
                NodeKind::Interface(i) => {
                    for method in &i.methods {
                        stack.push(method.param_struct);
                        stack.push(method.result_struct);
                    }
                    stack.extend(i.superclasses.iter().copied());
                }
                NodeKind::Const(c) => collect_type_targets(&c.type_ref, &mut stack),
            }
        }

        Ok(())
    }

    /// Resolve one declared import to a module location.
    fn resolve_import(
        &self,
        consumer: &Path,
        import: &str,
        known: &BTreeSet<PathBuf>,
    ) -> GenerateResult<PathBuf> {
        if let Some(rest) = import.strip_prefix('/') {
            for root in &self.import_roots {
                let candidate = normalize(&root.join(rest));
                if known.contains(&candidate) || candidate.exists() {
                    return Ok(candidate);
                }
            }
            return Err(GenerateError::unresolved_module(consumer, import));
        }

        let base = consumer.parent().unwrap_or_else(|| Path::new(""));
        let candidate = normalize(&base.join(import));
        if known.contains(&candidate) || candidate.exists() {
            Ok(candidate)
        } else {
            Err(GenerateError::unresolved_module(consumer, import))
        }
    }

    /// Make sure an owning-module spelling seen on a node has a location.
    ///
    /// Covers transitive imports that the walking module never declares
    /// itself but whose nodes it embeds.
    fn ensure_location(
        &self,
        inner: &mut RegistryInner,
        consumer: &Path,
        spelling: &Path,
        known: &BTreeSet<PathBuf>,
    ) -> GenerateResult<()> {
        let key = spelling.to_path_buf();
        if inner.locations.contains_key(&key) {
            return Ok(());
        }
        // A spelling that is already a locatable path stands for itself;
        // only unlocatable ones go through import-style resolution.
        let direct = normalize(spelling);
        if known.contains(&direct) || direct.exists() {
            inner.locations.insert(key, direct);
            return Ok(());
        }
        let spelled = spelling.to_string_lossy();
        let resolved = self.resolve_import(consumer, &spelled, known)?;
        inner.locations.insert(key, resolved);
        Ok(())
    }
}

fn collect_type_targets(type_ref: &TypeRef, stack: &mut Vec<NodeId>) {
    match type_ref {
        TypeRef::List { element } => collect_type_targets(element, stack),
        TypeRef::Enum { target } => stack.push(*target),
        TypeRef::Struct { target, brand } | TypeRef::Interface { target, brand } => {
            stack.push(*target);
            for binding in &brand.bindings {
                collect_type_targets(binding, stack);
            }
        }
        _ => {}
    }
}

/// Spelling under which an import's provider appears on embedded nodes.
///
/// Absolute imports keep their written form; relative imports normalize
/// against the consumer's directory, matching how the front half annotates
/// imported nodes.
fn import_spelling(consumer: &Path, import: &str) -> PathBuf {
    if import.starts_with('/') {
        PathBuf::from(import)
    } else {
        let base = consumer.parent().unwrap_or_else(|| Path::new(""));
        normalize(&base.join(import))
    }
}

/// Lexical path normalization: folds `.` and `..` without touching the
/// filesystem, so synthetic module paths behave like real ones.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn lock<'m>(shared: &'m Mutex<RegistryInner>) -> MutexGuard<'m, RegistryInner> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
struct RegistryInner {
    nodes: BTreeMap<NodeId, Node>,
    locations: BTreeMap<PathBuf, PathBuf>,
}

/// The frozen node registry produced by the walk phase.
///
/// Read-only from here on: the resolver and the writers share it across
/// threads without further locking.
#[derive(Debug, Clone)]
pub struct SchemaGraph {
    nodes: BTreeMap<NodeId, Node>,
    locations: BTreeMap<PathBuf, PathBuf>,
}

impl SchemaGraph {
    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Look up a node that must exist, attributing failures to `module`.
    pub fn expect_node(&self, module: &Path, id: NodeId) -> GenerateResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| GenerateError::unresolved_node(module, id))
    }

    /// Resolved filesystem location for a module spelling.
    pub fn location<'a>(&'a self, spelling: &'a Path) -> &'a Path {
        self.locations
            .get(spelling)
            .map(PathBuf::as_path)
            .unwrap_or(spelling)
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All registered ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, Method, StructNode};
    use crate::model::{EnumNode, InterfaceNode};

    fn file_node(id: u64, module: &str, nested: Vec<u64>) -> Node {
        Node::new(id, "", module, NodeKind::File)
            .with_nested(nested.into_iter().map(NodeId).collect())
    }

    #[test]
    fn test_walk_registers_nested_and_field_targets() {
        let module = LoadedModule::new(
            1,
            "person.capnp",
            vec![
                file_node(1, "person.capnp", vec![16]),
                Node::new(
                    16,
                    "Person",
                    "person.capnp",
                    NodeKind::Struct(StructNode::new(vec![
                        Field::slot("id", TypeRef::UInt32),
                        Field::slot("kind", TypeRef::enum_ref(17)),
                        Field::group("address", 18),
                    ])),
                )
                .with_parent(1)
                .with_nested(vec![NodeId(17)]),
                Node::new(
                    17,
                    "Kind",
                    "person.capnp",
                    NodeKind::Enum(EnumNode::new(vec!["alpha", "beta"])),
                )
                .with_parent(16),
                Node::new(
                    18,
                    "address",
                    "person.capnp",
                    NodeKind::Struct(
                        StructNode::new(vec![Field::slot("street", TypeRef::Text)])
                            .with_group(true),
                    ),
                )
                .with_parent(16),
            ],
        );

        let graph = SchemaWalker::new(vec![]).walk(&[module]).unwrap();
        assert_eq!(graph.len(), 4);
        assert!(graph.node(NodeId(18)).unwrap().as_struct().unwrap().is_group);
    }

    #[test]
    fn test_walk_reaches_method_structs_and_superclasses() {
        let module = LoadedModule::new(
            1,
            "calc.capnp",
            vec![
                file_node(1, "calc.capnp", vec![32, 40]),
                Node::new(
                    32,
                    "Base",
                    "calc.capnp",
                    NodeKind::Interface(InterfaceNode::new(vec![])),
                )
                .with_parent(1),
                Node::new(
                    40,
                    "Calculator",
                    "calc.capnp",
                    NodeKind::Interface(
                        InterfaceNode::new(vec![Method::new("evaluate", 41, 42)])
                            .with_superclasses(vec![NodeId(32)]),
                    ),
                )
                .with_parent(1),
                Node::new(
                    41,
                    "EvaluateParams",
                    "calc.capnp",
                    NodeKind::Struct(StructNode::new(vec![Field::slot(
                        "expression",
                        TypeRef::Text,
                    )])),
                )
                .with_parent(40),
                Node::new(
                    42,
                    "EvaluateResults",
                    "calc.capnp",
                    NodeKind::Struct(StructNode::new(vec![Field::slot(
                        "value",
                        TypeRef::Float64,
                    )])),
                )
                .with_parent(40),
            ],
        );

        let graph = SchemaWalker::new(vec![]).walk(&[module]).unwrap();
        assert_eq!(graph.len(), 5);
        assert!(graph.node(NodeId(41)).is_some());
        assert!(graph.node(NodeId(42)).is_some());
    }

    #[test]
    fn test_shared_import_registers_once() {
        let common = Node::new(
            90,
            "Date",
            "common.capnp",
            NodeKind::Struct(StructNode::new(vec![Field::slot("year", TypeRef::Int16)])),
        )
        .with_parent(9);
        let common_root = file_node(9, "common.capnp", vec![90]);

        let a = LoadedModule::new(
            1,
            "a.capnp",
            vec![
                file_node(1, "a.capnp", vec![10]),
                Node::new(
                    10,
                    "A",
                    "a.capnp",
                    NodeKind::Struct(StructNode::new(vec![Field::slot(
                        "when",
                        TypeRef::struct_ref(90),
                    )])),
                )
                .with_parent(1),
                common_root.clone(),
                common.clone(),
            ],
        )
        .with_imports(vec!["common.capnp"]);
        let b = LoadedModule::new(
            2,
            "b.capnp",
            vec![
                file_node(2, "b.capnp", vec![20]),
                Node::new(
                    20,
                    "B",
                    "b.capnp",
                    NodeKind::Struct(StructNode::new(vec![Field::slot(
                        "when",
                        TypeRef::struct_ref(90),
                    )])),
                )
                .with_parent(2),
                common_root,
                common,
            ],
        )
        .with_imports(vec!["common.capnp"]);
        let common_module = LoadedModule::new(
            9,
            "common.capnp",
            vec![
                file_node(9, "common.capnp", vec![90]),
                Node::new(
                    90,
                    "Date",
                    "common.capnp",
                    NodeKind::Struct(StructNode::new(vec![Field::slot("year", TypeRef::Int16)])),
                )
                .with_parent(9),
            ],
        );

        let graph = SchemaWalker::new(vec![])
            .walk(&[a, b, common_module])
            .unwrap();
        // a's root+A, b's root+B, common's root+Date.
        assert_eq!(graph.len(), 6);
    }

    #[test]
    fn test_unlocatable_absolute_import_is_fatal() {
        let module = LoadedModule::new(1, "app.capnp", vec![file_node(1, "app.capnp", vec![])])
            .with_imports(vec!["/std/common.capnp"]);

        let err = SchemaWalker::new(vec![]).walk(&[module]).unwrap_err();
        match err {
            GenerateError::UnresolvedModule { module, import } => {
                assert_eq!(module, PathBuf::from("app.capnp"));
                assert_eq!(import, "/std/common.capnp");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_absolute_import_resolves_against_known_module() {
        let app = LoadedModule::new(1, "app.capnp", vec![file_node(1, "app.capnp", vec![])])
            .with_imports(vec!["/common.capnp"]);
        let common = LoadedModule::new(
            9,
            "inc/common.capnp",
            vec![file_node(9, "inc/common.capnp", vec![])],
        );

        let graph = SchemaWalker::new(vec![PathBuf::from("inc")])
            .walk(&[app, common])
            .unwrap();
        assert_eq!(
            graph.location(Path::new("/common.capnp")),
            Path::new("inc/common.capnp")
        );
    }

    #[test]
    fn test_dangling_reference_is_fatal() {
        let module = LoadedModule::new(
            1,
            "a.capnp",
            vec![
                file_node(1, "a.capnp", vec![10]),
                Node::new(
                    10,
                    "A",
                    "a.capnp",
                    NodeKind::Struct(StructNode::new(vec![Field::slot(
                        "missing",
                        TypeRef::struct_ref(0xbad),
                    )])),
                )
                .with_parent(1),
            ],
        );

        let err = SchemaWalker::new(vec![]).walk(&[module]).unwrap_err();
        assert!(matches!(
            err,
            GenerateError::UnresolvedNode { id, .. } if id == NodeId(0xbad)
        ));
    }

    #[test]
    fn test_normalize_folds_dot_segments() {
        assert_eq!(
            normalize(Path::new("schemas/./sub/../common.capnp")),
            PathBuf::from("schemas/common.capnp")
        );
        assert_eq!(normalize(Path::new("../x.capnp")), PathBuf::from("../x.capnp"));
    }
}
