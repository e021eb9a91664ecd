//! Stub emitter.
//!
//! Renders one loaded module into its `.pyi` stub text and the matching
//! runtime-forwarding `.py` text. Declarations are written depth-first in
//! declaration order; a reference to a same-module declaration the emitter
//! has not reached yet renders as a quoted deferred name, so mutually
//! recursive schemas need no reordering pass. Output is a pure function of
//! the schema graph: emitting the same module twice yields identical bytes.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::diagnostics::Diagnostic;
use crate::error::GenerateResult;
use crate::mapper::{ImportSet, RenderScope, TypeContext, TypeMapper, Variant};
use crate::model::{
    ConstNode, EnumNode, Field, FieldKind, InterfaceNode, LoadedModule, Method, Node, NodeId,
    NodeKind, StructNode, TypeRef,
};
use crate::resolver::{relative_import, type_var_spelling, BrandEnv, NameTable, ResolvedName};
use crate::union;
use crate::walker::{normalize, SchemaGraph};

const INDENT: &str = "    ";

/// Runtime names every stub pulls from pycapnp, in one fixed line.
const RUNTIME_IMPORT: &str = "from capnp.lib.capnp import _CallContext, _DynamicCapabilityClient, _DynamicCapabilityServer, _DynamicListBuilder, _DynamicListReader, _DynamicObjectBuilder, _DynamicObjectReader, _DynamicStructBuilder, _DynamicStructReader, _InterfaceModule, _Request, _StructModule";

/// Everything the accepting `AnyPointer` alias admits.
const ANY_POINTER_TYPE: &str = "str | bytes | _DynamicStructBuilder | _DynamicStructReader | _DynamicCapabilityClient | _DynamicCapabilityServer | _DynamicListBuilder | _DynamicListReader | _DynamicObjectReader | _DynamicObjectBuilder";

/// Rendered output for one module.
#[derive(Debug, Clone)]
pub struct EmittedModule {
    /// Stub text, ending with a newline.
    pub pyi: String,

    /// Runtime forwarding module text, ending with a newline.
    pub py: String,

    /// Non-fatal findings collected while rendering.
    pub diagnostics: Vec<Diagnostic>,
}

/// Accumulated pieces of one module's stub, assembled at the end.
#[derive(Default)]
struct ModuleBody {
    imports: ImportSet,
    lines: Vec<String>,
    aliases: BTreeMap<String, String>,
    top_level: Vec<String>,
}

/// Renders schema declarations as Python stub text.
pub struct StubEmitter<'g> {
    graph: &'g SchemaGraph,
    names: &'g NameTable,
    mapper: TypeMapper<'g>,
}

impl<'g> StubEmitter<'g> {
    /// Create an emitter over the frozen graph and name table.
    pub fn new(graph: &'g SchemaGraph, names: &'g NameTable) -> Self {
        Self {
            graph,
            names,
            mapper: TypeMapper::new(graph, names),
        }
    }

    /// Render one module.
    pub fn emit(&self, module: &LoadedModule) -> GenerateResult<EmittedModule> {
        let module_path = normalize(&module.path);
        let root = self.graph.expect_node(&module_path, module.root_id)?;

        let mut body = ModuleBody::default();
        let mut emitted: HashSet<NodeId> = HashSet::new();
        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        for child in self.ordered_children(root) {
            let mark = body.lines.len();
            if mark > 0 {
                body.lines.push(String::new());
            }
            self.emit_node(&module_path, child, 0, &mut body, &mut emitted, &mut diagnostics)?;
            // A child that rendered nothing, like a struct-typed constant,
            // must not leave a stray separator behind.
            if mark > 0 && body.lines.len() == mark + 1 {
                body.lines.pop();
            }
        }

        let pyi = self.assemble_pyi(module, &module_path, &body);
        let py = self.assemble_py(module, &module_path, &body);
        Ok(EmittedModule {
            pyi,
            py,
            diagnostics,
        })
    }

    fn emit_node(
        &self,
        module: &Path,
        id: NodeId,
        depth: usize,
        body: &mut ModuleBody,
        emitted: &mut HashSet<NodeId>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> GenerateResult<()> {
        let node = self.graph.expect_node(module, id)?;
        match &node.kind {
            NodeKind::Struct(payload) => {
                self.emit_struct(module, node, payload, depth, body, emitted, diagnostics)
            }
            NodeKind::Enum(payload) => self.emit_enum(module, node, payload, depth, body, emitted),
            NodeKind::Interface(payload) => {
                self.emit_interface(module, node, payload, depth, body, emitted, diagnostics)
            }
            NodeKind::Const(payload) => self.emit_const(module, node, payload, depth, body, emitted),
            NodeKind::File => Ok(()),
        }
    }

    /// Children of a scope in emission order.
    ///
    /// Declaration order, except that an interface is hoisted above a
    /// sibling that extends it: Python resolves base classes eagerly, so a
    /// quoted deferred name cannot stand in for one.
    fn ordered_children(&self, node: &Node) -> Vec<NodeId> {
        let children = self.node_children(node);
        let siblings: HashSet<NodeId> = children.iter().copied().collect();
        let mut placed: HashSet<NodeId> = HashSet::new();
        let mut ordered: Vec<NodeId> = Vec::with_capacity(children.len());
        for id in children {
            self.place_child(id, &siblings, &mut placed, &mut ordered);
        }
        ordered
    }

    fn node_children(&self, node: &Node) -> Vec<NodeId> {
        let mut children = node.nested.clone();
        match &node.kind {
            NodeKind::Struct(s) => {
                for field in &s.fields {
                    if let Some(group) = field.group_id() {
                        children.push(group);
                    }
                }
            }
            NodeKind::Interface(i) => {
                for method in &i.methods {
                    for id in [method.param_struct, method.result_struct] {
                        let anonymous = self
                            .graph
                            .node(id)
                            .is_some_and(|n| n.parent == Some(node.id));
                        if anonymous && !node.nested.contains(&id) {
                            children.push(id);
                        }
                    }
                }
            }
            _ => {}
        }
        let mut seen: HashSet<NodeId> = HashSet::new();
        children.retain(|id| seen.insert(*id));
        children
    }

    fn place_child(
        &self,
        id: NodeId,
        siblings: &HashSet<NodeId>,
        placed: &mut HashSet<NodeId>,
        ordered: &mut Vec<NodeId>,
    ) {
        if !placed.insert(id) {
            return;
        }
        if let Some(iface) = self.graph.node(id).and_then(Node::as_interface) {
            for superclass in &iface.superclasses {
                if siblings.contains(superclass) {
                    self.place_child(*superclass, siblings, placed, ordered);
                }
            }
        }
        ordered.push(id);
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_struct(
        &self,
        module: &Path,
        node: &Node,
        payload: &StructNode,
        depth: usize,
        body: &mut ModuleBody,
        emitted: &mut HashSet<NodeId>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> GenerateResult<()> {
        let name = self.names.expect_name(module, node.id)?;
        diagnostics.extend(union::default_deviations(module, &name.user_path, payload));

        let params = own_param_spellings(node);
        let sub = subscript(&params);
        if !params.is_empty() {
            body.imports.typing("Generic");
        }
        let bases = if params.is_empty() {
            "_StructModule".to_owned()
        } else {
            format!("_StructModule, Generic[{}]", params.join(", "))
        };
        push(&mut body.lines, depth, &format!("class {}({bases}):", name.protocol_local));

        let inner = depth + 1;
        for child in self.ordered_children(node) {
            self.emit_node(module, child, inner, body, emitted, diagnostics)?;
        }

        let visible = self.visible_param_spellings(node);
        self.emit_reader_class(module, node, payload, name, &params, &sub, &visible, inner, body, emitted)?;
        self.emit_builder_class(module, node, payload, name, &params, &sub, &visible, inner, body, emitted)?;
        self.emit_struct_module_methods(module, node, payload, name, &sub, &visible, inner, body, emitted)?;

        let reader_key = format!("{}{sub}", name.reader_alias());
        let builder_key = format!("{}{sub}", name.builder_alias());
        if depth > 0 {
            push(
                &mut body.lines,
                depth,
                &format!("type {reader_key} = {}.Reader{sub}", name.protocol_local),
            );
            push(
                &mut body.lines,
                depth,
                &format!("type {builder_key} = {}.Builder{sub}", name.protocol_local),
            );
        }
        push(&mut body.lines, depth, &format!("{}: {}", name.local, name.protocol_local));

        body.aliases
            .insert(reader_key, format!("{}.Reader{sub}", name.protocol_path));
        body.aliases
            .insert(builder_key, format!("{}.Builder{sub}", name.protocol_path));
        if depth == 0 {
            body.top_level.push(name.local.clone());
        }
        emitted.insert(node.id);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_reader_class(
        &self,
        module: &Path,
        node: &Node,
        payload: &StructNode,
        name: &ResolvedName,
        params: &[String],
        sub: &str,
        visible: &[(NodeId, u16, String)],
        depth: usize,
        body: &mut ModuleBody,
        emitted: &HashSet<NodeId>,
    ) -> GenerateResult<()> {
        let bases = if params.is_empty() {
            "_DynamicStructReader".to_owned()
        } else {
            format!("_DynamicStructReader, Generic[{}]", params.join(", "))
        };
        push(&mut body.lines, depth, &format!("class Reader({bases}):"));
        let inner = depth + 1;

        for field in &payload.fields {
            let member = self.names.member_name(node.id, &field.name).to_owned();
            let location = format!("{}.{}", name.user_path, field.name);
            let rendered = self.field_type(
                module,
                field,
                TypeContext::FieldGetter(Variant::Reader),
                emitted,
                visible,
                &location,
                &mut body.imports,
            )?;
            push(&mut body.lines, inner, "@property");
            push(&mut body.lines, inner, &format!("def {member}(self) -> {rendered}: ..."));
        }

        self.push_which(payload, inner, body);

        body.imports.typing("Any");
        body.imports.typing("override");
        push(&mut body.lines, inner, "@override");
        push(
            &mut body.lines,
            inner,
            &format!(
                "def as_builder(self, num_first_segment_words: int | None = None, allocate_seg_callable: Any = None) -> {}{sub}: ...",
                name.builder_alias()
            ),
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_builder_class(
        &self,
        module: &Path,
        node: &Node,
        payload: &StructNode,
        name: &ResolvedName,
        params: &[String],
        sub: &str,
        visible: &[(NodeId, u16, String)],
        depth: usize,
        body: &mut ModuleBody,
        emitted: &HashSet<NodeId>,
    ) -> GenerateResult<()> {
        let bases = if params.is_empty() {
            "_DynamicStructBuilder".to_owned()
        } else {
            format!("_DynamicStructBuilder, Generic[{}]", params.join(", "))
        };
        push(&mut body.lines, depth, &format!("class Builder({bases}):"));
        let inner = depth + 1;

        for field in &payload.fields {
            let member = self.names.member_name(node.id, &field.name).to_owned();
            let location = format!("{}.{}", name.user_path, field.name);
            let getter = self.field_type(
                module,
                field,
                TypeContext::FieldGetter(Variant::Builder),
                emitted,
                visible,
                &location,
                &mut body.imports,
            )?;
            push(&mut body.lines, inner, "@property");
            push(&mut body.lines, inner, &format!("def {member}(self) -> {getter}: ..."));

            // Groups are populated through their builder, never assigned.
            if matches!(field.kind, FieldKind::Slot { .. }) {
                let accepted = self.field_type(
                    module,
                    field,
                    TypeContext::FieldSetter,
                    emitted,
                    visible,
                    &location,
                    &mut body.imports,
                )?;
                push(&mut body.lines, inner, &format!("@{member}.setter"));
                push(
                    &mut body.lines,
                    inner,
                    &format!("def {member}(self, value: {accepted}) -> None: ..."),
                );
            }
        }

        self.push_which(payload, inner, body);

        let mut choices: Vec<(String, String)> = Vec::new();
        for field in &payload.fields {
            let initializable = matches!(field.kind, FieldKind::Group { .. })
                || matches!(
                    field.slot_type(),
                    Some(TypeRef::Struct { .. }) | Some(TypeRef::List { .. })
                );
            if !initializable {
                continue;
            }
            let member = self.names.member_name(node.id, &field.name).to_owned();
            let location = format!("{}.{}", name.user_path, field.name);
            let rendered = self.field_type(
                module,
                field,
                TypeContext::FieldGetter(Variant::Builder),
                emitted,
                visible,
                &location,
                &mut body.imports,
            )?;
            choices.push((member, rendered));
        }
        if !choices.is_empty() {
            body.imports.typing("Literal");
            let overloaded = choices.len() > 1;
            if overloaded {
                body.imports.typing("overload");
            }
            for (member, rendered) in &choices {
                if overloaded {
                    push(&mut body.lines, inner, "@overload");
                }
                push(
                    &mut body.lines,
                    inner,
                    &format!(
                        "def init(self, field: Literal[\"{member}\"], size: int | None = None) -> {rendered}: ..."
                    ),
                );
            }
            if overloaded {
                body.imports.typing("Any");
                push(
                    &mut body.lines,
                    inner,
                    "def init(self, field: str, size: int | None = None) -> Any: ...",
                );
            }
        }

        body.imports.typing("override");
        push(&mut body.lines, inner, "@override");
        push(
            &mut body.lines,
            inner,
            &format!("def as_reader(self) -> {}{sub}: ...", name.reader_alias()),
        );
        Ok(())
    }

    fn push_which(&self, payload: &StructNode, depth: usize, body: &mut ModuleBody) {
        if let Some(selector) = union::selector_for(payload) {
            body.imports.typing("Literal");
            body.imports.typing("override");
            push(&mut body.lines, depth, "@override");
            push(
                &mut body.lines,
                depth,
                &format!("def which(self) -> {}: ...", selector.literal()),
            );
        }
    }

    /// Classmethod surface of the struct's module class.
    #[allow(clippy::too_many_arguments)]
    fn emit_struct_module_methods(
        &self,
        module: &Path,
        node: &Node,
        payload: &StructNode,
        name: &ResolvedName,
        sub: &str,
        visible: &[(NodeId, u16, String)],
        depth: usize,
        body: &mut ModuleBody,
        emitted: &HashSet<NodeId>,
    ) -> GenerateResult<()> {
        let reader = format!("{}{sub}", name.reader_alias());
        let builder = format!("{}{sub}", name.builder_alias());

        body.imports.typing("Any");
        body.imports.typing("override");
        let mut keywords = String::new();
        for field in &payload.fields {
            if !matches!(field.kind, FieldKind::Slot { .. }) {
                continue;
            }
            let member = self.names.member_name(node.id, &field.name).to_owned();
            let location = format!("{}.{}", name.user_path, field.name);
            let accepted = self.field_type(
                module,
                field,
                TypeContext::FieldSetter,
                emitted,
                visible,
                &location,
                &mut body.imports,
            )?;
            let hint = optional_hint(&accepted);
            keywords.push_str(&format!(", {member}: {hint} = None"));
        }
        push(&mut body.lines, depth, "@override");
        push(
            &mut body.lines,
            depth,
            &format!(
                "def new_message(self, num_first_segment_words: int | None = None, allocate_seg_callable: Any = None{keywords}, **kwargs: Any) -> {builder}: ..."
            ),
        );

        body.imports.contextlib();
        body.imports.typing("Literal");
        body.imports.typing("overload");
        push(&mut body.lines, depth, "@overload");
        push(
            &mut body.lines,
            depth,
            &format!(
                "def from_bytes(self, buf: bytes, traversal_limit_in_words: int | None = ..., nesting_limit: int | None = ...) -> AbstractContextManager[{reader}]: ..."
            ),
        );
        push(&mut body.lines, depth, "@overload");
        push(
            &mut body.lines,
            depth,
            &format!(
                "def from_bytes(self, buf: bytes, traversal_limit_in_words: int | None = ..., nesting_limit: int | None = ..., *, builder: Literal[False]) -> AbstractContextManager[{reader}]: ..."
            ),
        );
        push(&mut body.lines, depth, "@overload");
        push(
            &mut body.lines,
            depth,
            &format!(
                "def from_bytes(self, buf: bytes, traversal_limit_in_words: int | None = ..., nesting_limit: int | None = ..., *, builder: Literal[True]) -> AbstractContextManager[{builder}]: ..."
            ),
        );
        push(
            &mut body.lines,
            depth,
            "def from_bytes_packed(self, buf: bytes, traversal_limit_in_words: int | None = ..., nesting_limit: int | None = ...) -> _DynamicStructReader: ...",
        );

        body.imports.typing("IO");
        push(&mut body.lines, depth, "@override");
        push(
            &mut body.lines,
            depth,
            &format!(
                "def read(self, file: IO[str] | IO[bytes], traversal_limit_in_words: int | None = ..., nesting_limit: int | None = ...) -> {reader}: ..."
            ),
        );
        push(&mut body.lines, depth, "@override");
        push(
            &mut body.lines,
            depth,
            &format!(
                "def read_packed(self, file: IO[str] | IO[bytes], traversal_limit_in_words: int | None = ..., nesting_limit: int | None = ...) -> {reader}: ..."
            ),
        );
        Ok(())
    }

    fn emit_enum(
        &self,
        module: &Path,
        node: &Node,
        payload: &EnumNode,
        depth: usize,
        body: &mut ModuleBody,
        emitted: &mut HashSet<NodeId>,
    ) -> GenerateResult<()> {
        let name = self.names.expect_name(module, node.id)?;
        push(&mut body.lines, depth, &format!("class {}:", name.protocol_local));
        let inner = depth + 1;
        if payload.enumerants.is_empty() {
            push(&mut body.lines, inner, "...");
        } else {
            for enumerant in &payload.enumerants {
                let member = self.names.member_name(node.id, enumerant).to_owned();
                push(&mut body.lines, inner, &format!("{member}: int"));
            }
        }
        push(&mut body.lines, depth, &format!("{}: {}", name.local, name.protocol_local));

        // The alias admits both the runtime integer and the schema spelling;
        // which() and setters exchange the raw names.
        body.imports.typing("Literal");
        let values = payload
            .enumerants
            .iter()
            .map(|e| format!("\"{e}\""))
            .collect::<Vec<_>>()
            .join(", ");
        body.aliases
            .insert(name.enum_alias(), format!("int | Literal[{values}]"));
        if depth == 0 {
            body.top_level.push(name.local.clone());
        }
        emitted.insert(node.id);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_interface(
        &self,
        module: &Path,
        node: &Node,
        payload: &InterfaceNode,
        depth: usize,
        body: &mut ModuleBody,
        emitted: &mut HashSet<NodeId>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> GenerateResult<()> {
        let name = self.names.expect_name(module, node.id)?;
        let mut supers: Vec<&ResolvedName> = Vec::with_capacity(payload.superclasses.len());
        for superclass in &payload.superclasses {
            supers.push(self.names.expect_name(module, *superclass)?);
        }

        let bases = if supers.is_empty() {
            "_InterfaceModule".to_owned()
        } else {
            supers
                .iter()
                .map(|s| s.protocol_path.clone())
                .collect::<Vec<_>>()
                .join(", ")
        };
        push(&mut body.lines, depth, &format!("class {}({bases}):", name.protocol_local));
        let inner = depth + 1;

        for child in self.ordered_children(node) {
            self.emit_node(module, child, inner, body, emitted, diagnostics)?;
        }

        let visible = self.visible_param_spellings(node);
        let has_server = !payload.methods.is_empty() || !supers.is_empty();
        if has_server {
            let server_bases = supers
                .iter()
                .map(|s| format!("{}.Server", s.protocol_path))
                .collect::<Vec<_>>()
                .join(", ");
            let declaration = if server_bases.is_empty() {
                "class Server:".to_owned()
            } else {
                format!("class Server({server_bases}):")
            };
            push(&mut body.lines, inner, &declaration);
            if payload.methods.is_empty() {
                push(&mut body.lines, inner + 1, "...");
            } else {
                for method in &payload.methods {
                    let line = self.server_method_line(module, node, name, method, &visible, emitted, &mut body.imports)?;
                    push(&mut body.lines, inner + 1, &line);
                }
            }
        }

        let client_bases = if supers.is_empty() {
            "_DynamicCapabilityClient".to_owned()
        } else {
            supers
                .iter()
                .map(|s| format!("{}.{}", s.protocol_path, s.client_local()))
                .collect::<Vec<_>>()
                .join(", ")
        };
        push(
            &mut body.lines,
            inner,
            &format!("class {}({client_bases}):", name.client_local()),
        );
        if payload.methods.is_empty() {
            push(&mut body.lines, inner + 1, "...");
        } else {
            for method in &payload.methods {
                let line = self.client_method_line(module, node, name, method, &visible, emitted, &mut body.imports)?;
                push(&mut body.lines, inner + 1, &line);
            }
            for method in &payload.methods {
                let line = self.request_method_line(module, node, name, method, &visible, emitted, &mut body.imports)?;
                push(&mut body.lines, inner + 1, &line);
            }
        }

        let client_key = name.client_alias();
        let client_path = format!("{}.{}", name.protocol_path, name.client_local());
        if depth > 0 {
            push(&mut body.lines, depth, &format!("type {client_key} = {client_path}"));
            if has_server {
                push(
                    &mut body.lines,
                    depth,
                    &format!("type {} = {}.Server", name.server_alias(), name.protocol_path),
                );
            }
        }
        push(&mut body.lines, depth, &format!("{}: {}", name.local, name.protocol_local));

        body.aliases.insert(client_key, client_path);
        if has_server {
            body.aliases
                .insert(name.server_alias(), format!("{}.Server", name.protocol_path));
        }
        if depth == 0 {
            body.top_level.push(name.local.clone());
        }
        emitted.insert(node.id);
        Ok(())
    }

    /// `def name(self, params.., _context, **kwargs) -> Awaitable[..]: ...`
    ///
    /// Servers receive reader-side parameter types and produce the results
    /// builder; a method whose result struct has no fields resolves to None.
    #[allow(clippy::too_many_arguments)]
    fn server_method_line(
        &self,
        module: &Path,
        node: &Node,
        name: &ResolvedName,
        method: &Method,
        visible: &[(NodeId, u16, String)],
        emitted: &HashSet<NodeId>,
        imports: &mut ImportSet,
    ) -> GenerateResult<String> {
        imports.typing("Any");
        imports.typing("Awaitable");
        let spelled = self.names.member_name(node.id, &method.name).to_owned();
        let location = format!("{}.{}", name.user_path, method.name);

        let mut line = format!("def {spelled}(self");
        let param_node = self.graph.expect_node(module, method.param_struct)?;
        if let Some(params) = param_node.as_struct() {
            for field in &params.fields {
                let member = self.names.member_name(param_node.id, &field.name).to_owned();
                let rendered = self.field_type(
                    module,
                    field,
                    TypeContext::MethodReturn,
                    emitted,
                    visible,
                    &location,
                    imports,
                )?;
                line.push_str(&format!(", {member}: {rendered}"));
            }
        }

        let result_node = self.graph.expect_node(module, method.result_struct)?;
        let result_name = self.names.expect_name(module, method.result_struct)?;
        let returns = match result_node.as_struct() {
            Some(results) if results.fields.is_empty() => "Awaitable[None]".to_owned(),
            _ => format!("Awaitable[{} | None]", result_name.builder_alias()),
        };
        line.push_str(&format!(", _context: _CallContext, **kwargs: Any) -> {returns}: ..."));
        Ok(line)
    }

    /// `def name(self, params.. = None) -> Awaitable[..Reader]: ...`
    #[allow(clippy::too_many_arguments)]
    fn client_method_line(
        &self,
        module: &Path,
        node: &Node,
        name: &ResolvedName,
        method: &Method,
        visible: &[(NodeId, u16, String)],
        emitted: &HashSet<NodeId>,
        imports: &mut ImportSet,
    ) -> GenerateResult<String> {
        imports.typing("Awaitable");
        let spelled = self.names.member_name(node.id, &method.name).to_owned();
        let result_name = self.names.expect_name(module, method.result_struct)?;
        let params = self.call_params(module, node, name, method, visible, emitted, imports)?;
        Ok(format!(
            "def {spelled}(self{params}) -> Awaitable[{}]: ...",
            result_name.reader_alias()
        ))
    }

    /// `def name_request(self, params.. = None) -> _Request: ...`
    #[allow(clippy::too_many_arguments)]
    fn request_method_line(
        &self,
        module: &Path,
        node: &Node,
        name: &ResolvedName,
        method: &Method,
        visible: &[(NodeId, u16, String)],
        emitted: &HashSet<NodeId>,
        imports: &mut ImportSet,
    ) -> GenerateResult<String> {
        let spelled = self.names.member_name(node.id, &method.name).to_owned();
        let params = self.call_params(module, node, name, method, visible, emitted, imports)?;
        Ok(format!("def {spelled}_request(self{params}) -> _Request: ..."))
    }

    /// Caller-side parameter list, every parameter optional.
    #[allow(clippy::too_many_arguments)]
    fn call_params(
        &self,
        module: &Path,
        node: &Node,
        name: &ResolvedName,
        method: &Method,
        visible: &[(NodeId, u16, String)],
        emitted: &HashSet<NodeId>,
        imports: &mut ImportSet,
    ) -> GenerateResult<String> {
        let location = format!("{}.{}", name.user_path, method.name);
        let param_node = self.graph.expect_node(module, method.param_struct)?;
        let mut out = String::new();
        if let Some(params) = param_node.as_struct() {
            for field in &params.fields {
                let member = self.names.member_name(param_node.id, &field.name).to_owned();
                let rendered = self.field_type(
                    module,
                    field,
                    TypeContext::MethodParameter,
                    emitted,
                    visible,
                    &location,
                    imports,
                )?;
                let hint = optional_hint(&rendered);
                out.push_str(&format!(", {member}: {hint} = None"));
            }
        }
        Ok(out)
    }

    fn emit_const(
        &self,
        module: &Path,
        node: &Node,
        payload: &ConstNode,
        depth: usize,
        body: &mut ModuleBody,
        emitted: &mut HashSet<NodeId>,
    ) -> GenerateResult<()> {
        let name = self.names.expect_name(module, node.id)?;
        let data_like = matches!(payload.type_ref, TypeRef::Text | TypeRef::Data);
        if payload.type_ref.is_primitive() || data_like {
            let env = BrandEnv::default();
            let scope = RenderScope {
                module,
                emitted,
                env: &env,
                visible_params: &[],
                location: &name.user_path,
            };
            let rendered = self.mapper.map(
                &payload.type_ref,
                TypeContext::FieldGetter(Variant::Reader),
                &scope,
                &mut body.imports,
            )?;
            push(&mut body.lines, depth, &format!("{}: {rendered}", name.local));
        }
        emitted.insert(node.id);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn field_type(
        &self,
        module: &Path,
        field: &Field,
        ctx: TypeContext,
        emitted: &HashSet<NodeId>,
        visible: &[(NodeId, u16, String)],
        location: &str,
        imports: &mut ImportSet,
    ) -> GenerateResult<String> {
        match &field.kind {
            FieldKind::Slot { type_ref, .. } => {
                let env = BrandEnv::default();
                let scope = RenderScope {
                    module,
                    emitted,
                    env: &env,
                    visible_params: visible,
                    location,
                };
                self.mapper.map(type_ref, ctx, &scope, imports)
            }
            FieldKind::Group { type_id } => {
                let group = self.names.expect_name(module, *type_id)?;
                Ok(match ctx {
                    TypeContext::FieldGetter(Variant::Reader)
                    | TypeContext::ListElement(Variant::Reader)
                    | TypeContext::MethodReturn => group.reader_alias(),
                    _ => group.builder_alias(),
                })
            }
        }
    }

    /// TypeVar spellings visible to a node: its own parameters plus every
    /// enclosing scope's, keyed by declaring scope and index.
    fn visible_param_spellings(&self, node: &Node) -> Vec<(NodeId, u16, String)> {
        let mut out = Vec::new();
        let mut current = Some(node.id);
        while let Some(id) = current {
            let Some(n) = self.graph.node(id) else { break };
            for (index, param) in n.generic_params().iter().enumerate() {
                out.push((n.id, index as u16, type_var_spelling(param)));
            }
            current = n.parent;
        }
        out
    }

    fn assemble_pyi(&self, module: &LoadedModule, module_path: &Path, body: &ModuleBody) -> String {
        let mut imports = body.imports.clone();
        let type_vars: Vec<&str> = self.names.type_vars_for(module_path).collect();
        if !type_vars.is_empty() {
            imports.typing("TypeVar");
        }

        let mut out: Vec<String> = Vec::new();
        out.push(format!(
            "\"\"\"This is an automatically generated stub for `{}`.\"\"\"",
            schema_file_name(module)
        ));
        out.push("from __future__ import annotations".to_owned());
        if imports.needs_contextlib() {
            out.push("from contextlib import AbstractContextManager".to_owned());
        }
        let abc: Vec<&str> = imports.abc_names().collect();
        if !abc.is_empty() {
            out.push(format!("from collections.abc import {}", abc.join(", ")));
        }
        let typing: Vec<&str> = imports.typing_names().collect();
        if !typing.is_empty() {
            out.push(format!("from typing import {}", typing.join(", ")));
        }
        out.push(RUNTIME_IMPORT.to_owned());
        out.extend(self.import_edge_lines(module_path));

        if imports.needs_any_pointer() {
            out.push(String::new());
            out.push(
                "# Type alias for AnyPointer parameters (accepts all Cap'n Proto pointer types)"
                    .to_owned(),
            );
            out.push(format!("type AnyPointer = {ANY_POINTER_TYPE}"));
        }
        if !type_vars.is_empty() {
            out.push(String::new());
            for var in &type_vars {
                out.push(format!("{var} = TypeVar(\"{var}\")"));
            }
        }
        if !body.lines.is_empty() {
            out.push(String::new());
            out.extend(body.lines.iter().cloned());
        }
        if !body.aliases.is_empty() {
            out.push(String::new());
            out.push("# Top-level type aliases for use in type annotations".to_owned());
            for (alias, target) in &body.aliases {
                out.push(format!("type {alias} = {target}"));
            }
        }
        out.push(String::new());
        out.join("\n")
    }

    /// One deduplicated line per provider module, sorted.
    fn import_edge_lines(&self, module_path: &Path) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        for (provider, nodes) in self.names.edges_for(module_path) {
            let mut imported: BTreeSet<String> = BTreeSet::new();
            for id in nodes {
                let Some(node) = self.graph.node(*id) else { continue };
                let Some(name) = self.names.name(*id) else { continue };
                match &node.kind {
                    NodeKind::Struct(_) => {
                        imported.insert(name.reader_alias());
                        imported.insert(name.builder_alias());
                    }
                    NodeKind::Enum(_) => {
                        imported.insert(name.enum_alias());
                    }
                    NodeKind::Interface(_) => {
                        // Superclass bases spell the protocol path, whose
                        // head is the provider's top-level class.
                        let head = name
                            .protocol_path
                            .split('.')
                            .next()
                            .unwrap_or(name.protocol_local.as_str());
                        imported.insert(head.to_owned());
                        imported.insert(name.client_alias());
                    }
                    _ => {}
                }
            }
            if imported.is_empty() {
                continue;
            }
            let spelled: Vec<String> = imported.into_iter().collect();
            lines.push(format!(
                "from {} import {}",
                relative_import(module_path, provider),
                spelled.join(", ")
            ));
        }
        lines.sort();
        lines
    }

    fn assemble_py(&self, module: &LoadedModule, module_path: &Path, body: &ModuleBody) -> String {
        let file_name = schema_file_name(module);
        let mut out: Vec<String> = Vec::new();
        out.push(format!(
            "\"\"\"This is an automatically generated stub for `{file_name}`.\"\"\""
        ));
        out.push("import os".to_owned());
        out.push("import capnp".to_owned());
        out.push("capnp.remove_import_hook()".to_owned());
        out.push("here = os.path.dirname(os.path.abspath(__file__))".to_owned());
        out.push(format!(
            "module_file = os.path.abspath(os.path.join(here, \"{file_name}\"))"
        ));

        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for import in &module.imports {
            if let Some(dir) = relative_schema_dir(module_path, import) {
                candidates.insert(dir);
            }
        }
        for (provider, _) in self.names.edges_for(module_path) {
            candidates.insert(relative_dir(module_path, provider));
        }
        let mut entries = vec!["here".to_owned()];
        for dir in candidates {
            if dir.is_empty() || dir == "." {
                continue;
            }
            entries.push(format!("os.path.abspath(os.path.join(here, \"{dir}\"))"));
        }
        out.push(format!("import_path = [{}]", entries.join(", ")));

        for top in &body.top_level {
            out.push(format!(
                "{top} = capnp.load(module_file, imports=import_path).{top}"
            ));
        }
        out.push(String::new());
        out.join("\n")
    }
}

fn push(lines: &mut Vec<String>, depth: usize, text: &str) {
    if text.is_empty() {
        lines.push(String::new());
    } else {
        lines.push(format!("{}{text}", INDENT.repeat(depth)));
    }
}

fn own_param_spellings(node: &Node) -> Vec<String> {
    node.generic_params()
        .iter()
        .map(|p| type_var_spelling(p))
        .collect()
}

fn subscript(params: &[String]) -> String {
    if params.is_empty() {
        String::new()
    } else {
        format!("[{}]", params.join(", "))
    }
}

/// `T | None`, collapsing the all-None case a void field produces.
fn optional_hint(rendered: &str) -> String {
    if rendered == "None" {
        "None".to_owned()
    } else {
        format!("{rendered} | None")
    }
}

fn schema_file_name(module: &LoadedModule) -> String {
    module
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| module.path.display().to_string())
}

/// Directory of a provider module relative to the consumer's directory,
/// `..`-style, for the runtime import path list.
fn relative_dir(consumer: &Path, provider: &Path) -> String {
    let consumer_dir: Vec<_> = consumer
        .parent()
        .map(|p| p.components().collect())
        .unwrap_or_default();
    let provider_dir: Vec<_> = provider
        .parent()
        .map(|p| p.components().collect())
        .unwrap_or_default();
    let shared = consumer_dir
        .iter()
        .zip(provider_dir.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<String> = Vec::new();
    for _ in shared..consumer_dir.len() {
        parts.push("..".to_owned());
    }
    for component in &provider_dir[shared..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    if parts.is_empty() {
        ".".to_owned()
    } else {
        parts.join("/")
    }
}

/// Resolve a relative import spelling against the consumer's directory.
/// Absolute (`/`-prefixed) spellings resolve through the walker's roots
/// instead, so the referenced provider reaches the path list via its edge.
fn relative_schema_dir(consumer: &Path, import: &str) -> Option<String> {
    if import.starts_with('/') {
        return None;
    }
    let base = consumer.parent().unwrap_or_else(|| Path::new(""));
    let resolved = normalize(&base.join(import));
    Some(relative_dir(consumer, &resolved))
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::model::{EnumNode, Field, LoadedModule, Node, StructNode};
    use crate::resolver::ScopeResolver;
    use crate::walker::SchemaWalker;
    use proptest::prelude::*;

    fn render(modules: Vec<LoadedModule>) -> (String, String) {
        let graph = SchemaWalker::new(vec![]).walk(&modules).unwrap();
        let (names, _) = ScopeResolver::new(&graph).resolve(&modules).unwrap();
        let emitter = StubEmitter::new(&graph, &names);
        let out = emitter.emit(&modules[0]).unwrap();
        (out.pyi, out.py)
    }

    fn enum_module(enumerants: Vec<String>) -> LoadedModule {
        LoadedModule::new(
            1,
            "palette.capnp",
            vec![
                Node::new(1, "", "palette.capnp", NodeKind::File).with_nested(vec![NodeId(16)]),
                Node::new(
                    16,
                    "Color",
                    "palette.capnp",
                    NodeKind::Enum(EnumNode::new(enumerants)),
                )
                .with_parent(1),
            ],
        )
    }

    fn struct_module(fields: Vec<(String, u8)>) -> LoadedModule {
        let pool = [
            TypeRef::Text,
            TypeRef::Bool,
            TypeRef::UInt32,
            TypeRef::Float64,
            TypeRef::Data,
        ];
        let fields = fields
            .into_iter()
            .enumerate()
            .map(|(i, (name, pick))| {
                Field::slot(format!("{name}{i}"), pool[(pick as usize) % pool.len()].clone())
            })
            .collect();
        LoadedModule::new(
            1,
            "record.capnp",
            vec![
                Node::new(1, "", "record.capnp", NodeKind::File).with_nested(vec![NodeId(16)]),
                Node::new(16, "Record", "record.capnp", NodeKind::Struct(StructNode::new(fields)))
                    .with_parent(1),
            ],
        )
    }

    proptest! {
        #[test]
        fn prop_enum_alias_lists_every_enumerant(
            names in proptest::collection::btree_set("[a-z][a-z0-9]{0,6}", 1..6)
        ) {
            let enumerants: Vec<String> = names.into_iter().collect();
            let (pyi, _) = render(vec![enum_module(enumerants.clone())]);
            for enumerant in &enumerants {
                let needle = format!("\"{enumerant}\"");
                prop_assert!(pyi.contains(&needle));
            }
        }

        #[test]
        fn prop_emission_is_deterministic(
            fields in proptest::collection::vec(("[a-z][a-z0-9]{0,5}", 0u8..10), 0..8)
        ) {
            let fields: Vec<(String, u8)> = fields;
            let (first_pyi, first_py) = render(vec![struct_module(fields.clone())]);
            let (second_pyi, second_py) = render(vec![struct_module(fields)]);
            prop_assert_eq!(first_pyi, second_pyi);
            prop_assert_eq!(first_py, second_py);
        }
    }
}
