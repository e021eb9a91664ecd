//! Type mapper.
//!
//! Translates a schema type reference into a Python type expression for a
//! given use context. The context picks the Reader, Builder, or accepting
//! union form; generic bindings come from the use site's [`BrandEnv`];
//! references to declarations of the same module that the writer has not
//! reached yet render as quoted deferred names, which is what lets mutually
//! recursive declarations emit in plain declaration order.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::error::{GenerateError, GenerateResult};
use crate::model::{NodeId, TypeRef};
use crate::resolver::{BrandEnv, NameTable, ResolvedName};
use crate::walker::SchemaGraph;

/// Which access surface a struct reference stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Read-only view.
    Reader,
    /// Mutable view.
    Builder,
}

/// Use context of a type reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeContext {
    /// Property return type on a Reader or Builder class.
    FieldGetter(Variant),
    /// Accepted type of a property setter or constructor keyword.
    FieldSetter,
    /// Element position inside a list expression.
    ListElement(Variant),
    /// Client-side method parameter.
    MethodParameter,
    /// Result field surfaced to the caller.
    MethodReturn,
}

impl TypeContext {
    fn variant(self) -> Variant {
        match self {
            TypeContext::FieldGetter(v) | TypeContext::ListElement(v) => v,
            TypeContext::FieldSetter | TypeContext::MethodParameter => Variant::Builder,
            TypeContext::MethodReturn => Variant::Reader,
        }
    }
}

/// Ambient imports a module's rendered expressions depend on.
///
/// The writer seeds the fixed runtime import line itself; this tracks only
/// the names whose presence varies with the rendered surface.
#[derive(Debug, Default, Clone)]
pub struct ImportSet {
    typing: BTreeSet<String>,
    abc: BTreeSet<String>,
    contextlib: bool,
    any_pointer: bool,
}

impl ImportSet {
    /// Require a `typing` name.
    pub fn typing(&mut self, name: &str) {
        self.typing.insert(name.to_owned());
    }

    /// Require a `collections.abc` name.
    pub fn abc(&mut self, name: &str) {
        self.abc.insert(name.to_owned());
    }

    /// Require `contextlib.AbstractContextManager`.
    pub fn contextlib(&mut self) {
        self.contextlib = true;
    }

    /// Require the module-level `AnyPointer` accepting alias.
    pub fn any_pointer(&mut self) {
        self.any_pointer = true;
    }

    /// Sorted `typing` names.
    pub fn typing_names(&self) -> impl Iterator<Item = &str> {
        self.typing.iter().map(String::as_str)
    }

    /// Sorted `collections.abc` names.
    pub fn abc_names(&self) -> impl Iterator<Item = &str> {
        self.abc.iter().map(String::as_str)
    }

    /// Whether the contextlib import is needed.
    pub fn needs_contextlib(&self) -> bool {
        self.contextlib
    }

    /// Whether the `AnyPointer` alias must be declared.
    pub fn needs_any_pointer(&self) -> bool {
        self.any_pointer
    }
}

/// Everything the mapper needs to know about the point of use.
pub struct RenderScope<'a> {
    /// Module whose stub is being rendered, normalized.
    pub module: &'a Path,
    /// Same-module nodes the writer has already emitted.
    pub emitted: &'a HashSet<NodeId>,
    /// Generic bindings at this use site.
    pub env: &'a BrandEnv,
    /// TypeVar spellings for parameters of enclosing generic scopes.
    pub visible_params: &'a [(NodeId, u16, String)],
    /// Field or method the reference appears on, for error attribution.
    pub location: &'a str,
}

impl<'a> RenderScope<'a> {
    fn visible_param(&self, scope: NodeId, index: u16) -> Option<&str> {
        self.visible_params
            .iter()
            .find(|(s, i, _)| *s == scope && *i == index)
            .map(|(_, _, name)| name.as_str())
    }
}

/// Context-driven translation from schema types to Python type expressions.
pub struct TypeMapper<'g> {
    graph: &'g SchemaGraph,
    names: &'g NameTable,
}

impl<'g> TypeMapper<'g> {
    /// Create a mapper over the frozen graph and name table.
    pub fn new(graph: &'g SchemaGraph, names: &'g NameTable) -> Self {
        Self { graph, names }
    }

    /// Map one type reference in the given context.
    pub fn map(
        &self,
        type_ref: &TypeRef,
        ctx: TypeContext,
        scope: &RenderScope<'_>,
        imports: &mut ImportSet,
    ) -> GenerateResult<String> {
        match type_ref {
            TypeRef::Void => Ok("None".to_owned()),
            TypeRef::Bool => Ok("bool".to_owned()),
            TypeRef::Int8
            | TypeRef::Int16
            | TypeRef::Int32
            | TypeRef::Int64
            | TypeRef::UInt8
            | TypeRef::UInt16
            | TypeRef::UInt32
            | TypeRef::UInt64 => Ok("int".to_owned()),
            TypeRef::Float32 | TypeRef::Float64 => Ok("float".to_owned()),
            TypeRef::Text => Ok("str".to_owned()),
            TypeRef::Data => Ok("bytes".to_owned()),

            TypeRef::List { element } => self.map_list(element, ctx, scope, imports),

            TypeRef::Enum { target } => {
                let name = self.names.expect_name(scope.module, *target)?;
                Ok(self.deferred(name.enum_alias(), *target, name, scope))
            }

            TypeRef::Struct { target, brand } => {
                let name = self.names.expect_name(scope.module, *target)?;
                let args = self.brand_args(*target, brand, ctx.variant(), scope, imports)?;
                let rendered = match ctx {
                    TypeContext::FieldGetter(Variant::Reader)
                    | TypeContext::ListElement(Variant::Reader)
                    | TypeContext::MethodReturn => {
                        format!("{}{}", name.reader_alias(), args)
                    }
                    TypeContext::FieldGetter(Variant::Builder)
                    | TypeContext::ListElement(Variant::Builder) => {
                        format!("{}{}", name.builder_alias(), args)
                    }
                    TypeContext::FieldSetter | TypeContext::MethodParameter => {
                        imports.typing("Any");
                        format!(
                            "{b}{args} | {r}{args} | dict[str, Any]",
                            b = name.builder_alias(),
                            r = name.reader_alias(),
                        )
                    }
                };
                Ok(self.deferred(rendered, *target, name, scope))
            }

            TypeRef::Interface { target, .. } => {
                let name = self.names.expect_name(scope.module, *target)?;
                Ok(self.deferred(name.client_alias(), *target, name, scope))
            }

            TypeRef::AnyPointer => Ok(untyped_pointer(ctx, imports)),

            TypeRef::GenericParam {
                scope: param_scope,
                index,
            } => self.map_generic_param(*param_scope, *index, ctx, scope, imports),
        }
    }

    fn map_list(
        &self,
        element: &TypeRef,
        ctx: TypeContext,
        scope: &RenderScope<'_>,
        imports: &mut ImportSet,
    ) -> GenerateResult<String> {
        let (container, element_ctx) = match ctx {
            TypeContext::FieldGetter(Variant::Builder) | TypeContext::ListElement(Variant::Builder) => {
                ("MutableSequence", TypeContext::ListElement(Variant::Builder))
            }
            TypeContext::FieldGetter(Variant::Reader)
            | TypeContext::ListElement(Variant::Reader)
            | TypeContext::MethodReturn => ("Sequence", TypeContext::ListElement(Variant::Reader)),
            TypeContext::FieldSetter | TypeContext::MethodParameter => {
                ("Sequence", TypeContext::MethodParameter)
            }
        };
        imports.abc(container);
        let inner = self.map(element, element_ctx, scope, imports)?;
        Ok(format!("{container}[{inner}]"))
    }

    fn map_generic_param(
        &self,
        param_scope: NodeId,
        index: u16,
        ctx: TypeContext,
        scope: &RenderScope<'_>,
        imports: &mut ImportSet,
    ) -> GenerateResult<String> {
        if let Some(bound) = scope.env.lookup(param_scope, index) {
            return self.map(bound, ctx, scope, imports);
        }
        if let Some(var) = scope.visible_param(param_scope, index) {
            return Ok(var.to_owned());
        }
        match self.graph.node(param_scope) {
            Some(node) if (index as usize) < node.generic_params().len() => {
                // Unbound parameter outside its declaring scope reads as an
                // untyped pointer.
                Ok(untyped_pointer(ctx, imports))
            }
            Some(node) => Err(GenerateError::unsupported_type(
                scope.module,
                scope.location,
                format!(
                    "generic parameter {index} is out of range for `{}`",
                    if node.name.is_empty() { "<anonymous>" } else { &node.name }
                ),
            )),
            None => Err(GenerateError::unsupported_type(
                scope.module,
                scope.location,
                format!("generic parameter scope {param_scope} is not in the schema graph"),
            )),
        }
    }

    /// Rendered generic arguments for a branded reference, `[a, b]` form.
    fn brand_args(
        &self,
        target: NodeId,
        brand: &crate::model::Brand,
        variant: Variant,
        scope: &RenderScope<'_>,
        imports: &mut ImportSet,
    ) -> GenerateResult<String> {
        if brand.is_empty() {
            return Ok(String::new());
        }
        let param_count = self
            .graph
            .node(target)
            .map(|n| n.generic_params().len())
            .unwrap_or(0);
        if param_count == 0 {
            return Ok(String::new());
        }

        let mut args = Vec::with_capacity(param_count);
        for index in 0..param_count {
            match brand.binding(index as u16) {
                Some(bound) => {
                    args.push(self.map(bound, TypeContext::ListElement(variant), scope, imports)?)
                }
                None => {
                    imports.typing("Any");
                    args.push("Any".to_owned());
                }
            }
        }
        Ok(format!("[{}]", args.join(", ")))
    }

    /// Quote a same-module reference the writer has not emitted yet.
    fn deferred(
        &self,
        rendered: String,
        target: NodeId,
        name: &ResolvedName,
        scope: &RenderScope<'_>,
    ) -> String {
        let local = name.module == scope.module;
        if local && !scope.emitted.contains(&target) {
            format!("\"{rendered}\"")
        } else {
            rendered
        }
    }
}

/// Dynamic-object spelling for untyped pointers per context.
///
/// Accepting positions use the `AnyPointer` alias, which the writer only
/// declares when something in the module asked for it.
fn untyped_pointer(ctx: TypeContext, imports: &mut ImportSet) -> String {
    let rendered = match ctx {
        TypeContext::FieldGetter(Variant::Builder) | TypeContext::ListElement(Variant::Builder) => {
            "_DynamicObjectBuilder"
        }
        TypeContext::FieldGetter(Variant::Reader)
        | TypeContext::ListElement(Variant::Reader)
        | TypeContext::MethodReturn => "_DynamicObjectReader",
        TypeContext::FieldSetter | TypeContext::MethodParameter => {
            imports.any_pointer();
            "AnyPointer"
        }
    };
    rendered.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Brand, Field, LoadedModule, Node, NodeKind, StructNode};
    use crate::resolver::ScopeResolver;
    use crate::walker::SchemaWalker;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn fixture() -> (SchemaGraph, NameTable, PathBuf) {
        let modules = vec![LoadedModule::new(
            1,
            "zoo.capnp",
            vec![
                Node::new(1, "", "zoo.capnp", NodeKind::File)
                    .with_nested(vec![NodeId(16), NodeId(17), NodeId(18)]),
                Node::new(
                    16,
                    "Animal",
                    "zoo.capnp",
                    NodeKind::Struct(StructNode::new(vec![Field::slot("name", TypeRef::Text)])),
                )
                .with_parent(1),
                Node::new(
                    17,
                    "Cache",
                    "zoo.capnp",
                    NodeKind::Struct(
                        StructNode::new(vec![Field::slot(
                            "value",
                            TypeRef::generic_param(17, 0),
                        )])
                        .with_generic_params(vec!["T".into()]),
                    ),
                )
                .with_parent(1),
                Node::new(
                    18,
                    "Feeder",
                    "zoo.capnp",
                    NodeKind::Interface(crate::model::InterfaceNode::new(vec![])),
                )
                .with_parent(1),
            ],
        )];
        let graph = SchemaWalker::new(vec![]).walk(&modules).unwrap();
        let (table, _) = ScopeResolver::new(&graph).resolve(&modules).unwrap();
        (graph, table, PathBuf::from("zoo.capnp"))
    }

    fn scope<'a>(
        module: &'a Path,
        emitted: &'a HashSet<NodeId>,
        env: &'a BrandEnv,
    ) -> RenderScope<'a> {
        RenderScope {
            module,
            emitted,
            env,
            visible_params: &[],
            location: "test.location",
        }
    }

    #[test]
    fn test_primitive_table() {
        let (graph, table, module) = fixture();
        let mapper = TypeMapper::new(&graph, &table);
        let emitted = HashSet::new();
        let env = BrandEnv::default();
        let scope = scope(&module, &emitted, &env);
        let mut imports = ImportSet::default();

        let ctx = TypeContext::FieldGetter(Variant::Reader);
        for (t, expected) in [
            (TypeRef::Void, "None"),
            (TypeRef::Bool, "bool"),
            (TypeRef::UInt64, "int"),
            (TypeRef::Float32, "float"),
            (TypeRef::Text, "str"),
            (TypeRef::Data, "bytes"),
        ] {
            assert_eq!(mapper.map(&t, ctx, &scope, &mut imports).unwrap(), expected);
        }
    }

    #[test]
    fn test_struct_variant_selection_per_context() {
        let (graph, table, module) = fixture();
        let mapper = TypeMapper::new(&graph, &table);
        let mut emitted = HashSet::new();
        emitted.insert(NodeId(16));
        let env = BrandEnv::default();
        let scope = scope(&module, &emitted, &env);
        let mut imports = ImportSet::default();
        let animal = TypeRef::struct_ref(16);

        assert_eq!(
            mapper
                .map(&animal, TypeContext::FieldGetter(Variant::Reader), &scope, &mut imports)
                .unwrap(),
            "AnimalReader"
        );
        assert_eq!(
            mapper
                .map(&animal, TypeContext::FieldGetter(Variant::Builder), &scope, &mut imports)
                .unwrap(),
            "AnimalBuilder"
        );
        assert_eq!(
            mapper
                .map(&animal, TypeContext::FieldSetter, &scope, &mut imports)
                .unwrap(),
            "AnimalBuilder | AnimalReader | dict[str, Any]"
        );
        assert_eq!(
            mapper
                .map(&animal, TypeContext::MethodReturn, &scope, &mut imports)
                .unwrap(),
            "AnimalReader"
        );
        assert!(imports.typing_names().any(|n| n == "Any"));
    }

    #[test]
    fn test_unemitted_sibling_renders_quoted() {
        let (graph, table, module) = fixture();
        let mapper = TypeMapper::new(&graph, &table);
        let emitted = HashSet::new();
        let env = BrandEnv::default();
        let scope = scope(&module, &emitted, &env);
        let mut imports = ImportSet::default();

        let rendered = mapper
            .map(
                &TypeRef::struct_ref(16),
                TypeContext::FieldGetter(Variant::Reader),
                &scope,
                &mut imports,
            )
            .unwrap();
        assert_eq!(rendered, "\"AnimalReader\"");
    }

    #[test]
    fn test_list_container_follows_variant() {
        let (graph, table, module) = fixture();
        let mapper = TypeMapper::new(&graph, &table);
        let mut emitted = HashSet::new();
        emitted.insert(NodeId(16));
        let env = BrandEnv::default();
        let scope = scope(&module, &emitted, &env);
        let mut imports = ImportSet::default();
        let list = TypeRef::list(TypeRef::struct_ref(16));

        assert_eq!(
            mapper
                .map(&list, TypeContext::FieldGetter(Variant::Reader), &scope, &mut imports)
                .unwrap(),
            "Sequence[AnimalReader]"
        );
        assert_eq!(
            mapper
                .map(&list, TypeContext::FieldGetter(Variant::Builder), &scope, &mut imports)
                .unwrap(),
            "MutableSequence[AnimalBuilder]"
        );
        assert_eq!(
            mapper
                .map(&list, TypeContext::FieldSetter, &scope, &mut imports)
                .unwrap(),
            "Sequence[AnimalBuilder | AnimalReader | dict[str, Any]]"
        );
        let abc: Vec<_> = imports.abc_names().collect();
        assert_eq!(abc, vec!["MutableSequence", "Sequence"]);
    }

    #[test]
    fn test_two_brands_of_one_node_yield_two_expressions() {
        let (graph, table, module) = fixture();
        let mapper = TypeMapper::new(&graph, &table);
        let mut emitted = HashSet::new();
        emitted.insert(NodeId(17));
        let env = BrandEnv::default();
        let scope = scope(&module, &emitted, &env);
        let mut imports = ImportSet::default();

        let text_brand = TypeRef::struct_branded(17, Brand::new(vec![TypeRef::Text]));
        let int_brand = TypeRef::struct_branded(17, Brand::new(vec![TypeRef::UInt32]));

        let a = mapper
            .map(&text_brand, TypeContext::FieldGetter(Variant::Reader), &scope, &mut imports)
            .unwrap();
        let b = mapper
            .map(&int_brand, TypeContext::FieldGetter(Variant::Reader), &scope, &mut imports)
            .unwrap();
        assert_eq!(a, "CacheReader[str]");
        assert_eq!(b, "CacheReader[int]");
        assert_ne!(a, b);
    }

    #[test]
    fn test_bound_generic_param_substitutes() {
        let (graph, table, module) = fixture();
        let mapper = TypeMapper::new(&graph, &table);
        let emitted = HashSet::new();
        let env = BrandEnv::of(NodeId(17), &Brand::new(vec![TypeRef::Text]));
        let scope = scope(&module, &emitted, &env);
        let mut imports = ImportSet::default();

        let rendered = mapper
            .map(
                &TypeRef::generic_param(17, 0),
                TypeContext::FieldGetter(Variant::Reader),
                &scope,
                &mut imports,
            )
            .unwrap();
        assert_eq!(rendered, "str");
    }

    #[test]
    fn test_unbound_generic_param_with_visible_var() {
        let (graph, table, module) = fixture();
        let mapper = TypeMapper::new(&graph, &table);
        let emitted = HashSet::new();
        let env = BrandEnv::default();
        let visible = vec![(NodeId(17), 0u16, "T".to_owned())];
        let scope = RenderScope {
            module: &module,
            emitted: &emitted,
            env: &env,
            visible_params: &visible,
            location: "Cache.value",
        };
        let mut imports = ImportSet::default();

        let rendered = mapper
            .map(
                &TypeRef::generic_param(17, 0),
                TypeContext::FieldGetter(Variant::Reader),
                &scope,
                &mut imports,
            )
            .unwrap();
        assert_eq!(rendered, "T");
    }

    #[test]
    fn test_unknown_generic_scope_is_unsupported() {
        let (graph, table, module) = fixture();
        let mapper = TypeMapper::new(&graph, &table);
        let emitted = HashSet::new();
        let env = BrandEnv::default();
        let scope = scope(&module, &emitted, &env);
        let mut imports = ImportSet::default();

        let err = mapper
            .map(
                &TypeRef::generic_param(0xfeed, 0),
                TypeContext::FieldGetter(Variant::Reader),
                &scope,
                &mut imports,
            )
            .unwrap_err();
        assert!(matches!(err, GenerateError::UnsupportedTypeReference { .. }));
    }

    #[test]
    fn test_any_pointer_forms() {
        let (graph, table, module) = fixture();
        let mapper = TypeMapper::new(&graph, &table);
        let emitted = HashSet::new();
        let env = BrandEnv::default();
        let scope = scope(&module, &emitted, &env);
        let mut imports = ImportSet::default();

        assert_eq!(
            mapper
                .map(&TypeRef::AnyPointer, TypeContext::FieldGetter(Variant::Reader), &scope, &mut imports)
                .unwrap(),
            "_DynamicObjectReader"
        );
        assert!(!imports.needs_any_pointer());
        assert_eq!(
            mapper
                .map(&TypeRef::AnyPointer, TypeContext::FieldSetter, &scope, &mut imports)
                .unwrap(),
            "AnyPointer"
        );
        assert!(imports.needs_any_pointer());
    }

    #[test]
    fn test_interface_maps_to_client() {
        let (graph, table, module) = fixture();
        let mapper = TypeMapper::new(&graph, &table);
        let mut emitted = HashSet::new();
        emitted.insert(NodeId(18));
        let env = BrandEnv::default();
        let scope = scope(&module, &emitted, &env);
        let mut imports = ImportSet::default();

        assert_eq!(
            mapper
                .map(
                    &TypeRef::interface_ref(18),
                    TypeContext::MethodParameter,
                    &scope,
                    &mut imports
                )
                .unwrap(),
            "FeederClient"
        );
    }
}
