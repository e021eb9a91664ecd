//! Schema graph model.
//!
//! This module defines the immutable node model for a compiled Cap'n Proto
//! schema graph: nodes keyed by stable 64-bit ids, fields, type references,
//! generic brands, and the per-file [`LoadedModule`] boundary object that the
//! external compiler front half hands to [`crate::generate`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Discriminant value marking a field that is not a member of its struct's
/// union. Matches the compiler's `0xffff` sentinel.
pub const DISCRIMINANT_NONE: u16 = 65535;

/// Schema-graph document version accepted by the loader.
pub const SCHEMA_VERSION: u32 = 1;

/// Default values for a schema-graph constant or field.
pub type Value = serde_json::Value;

/// Stable 64-bit node identity.
///
/// Ids are assigned by the schema compiler and survive recompilation, so the
/// registry, the name table, and all cross-references key on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        NodeId(raw)
    }
}

/// A single declaration in the schema graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Stable id.
    pub id: NodeId,

    /// Unqualified declared name. Empty for file-scope nodes.
    #[serde(default)]
    pub name: String,

    /// Source path of the module that declares this node.
    pub module: PathBuf,

    /// Enclosing scope, `None` for file-scope nodes.
    #[serde(default)]
    pub parent: Option<NodeId>,

    /// Directly nested declarations, in declaration order.
    #[serde(default)]
    pub nested: Vec<NodeId>,

    /// Kind-specific payload.
    pub kind: NodeKind,
}

impl Node {
    /// Create a node with the given identity and payload.
    pub fn new(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        module: impl Into<PathBuf>,
        kind: NodeKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            module: module.into(),
            parent: None,
            nested: Vec::new(),
            kind,
        }
    }

    /// Set the enclosing scope.
    pub fn with_parent(mut self, parent: impl Into<NodeId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Set the nested declaration list.
    pub fn with_nested(mut self, nested: Vec<NodeId>) -> Self {
        self.nested = nested;
        self
    }

    /// Whether this node is a file scope.
    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File)
    }

    /// Struct payload, if this node is a struct or group.
    pub fn as_struct(&self) -> Option<&StructNode> {
        match &self.kind {
            NodeKind::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Enum payload, if any.
    pub fn as_enum(&self) -> Option<&EnumNode> {
        match &self.kind {
            NodeKind::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Interface payload, if any.
    pub fn as_interface(&self) -> Option<&InterfaceNode> {
        match &self.kind {
            NodeKind::Interface(i) => Some(i),
            _ => None,
        }
    }

    /// Const payload, if any.
    pub fn as_const(&self) -> Option<&ConstNode> {
        match &self.kind {
            NodeKind::Const(c) => Some(c),
            _ => None,
        }
    }

    /// Generic parameter names declared on this node, outermost first.
    pub fn generic_params(&self) -> &[String] {
        match &self.kind {
            NodeKind::Struct(s) => &s.generic_params,
            NodeKind::Interface(i) => &i.generic_params,
            _ => &[],
        }
    }
}

/// Kind of schema declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKind {
    /// File scope; its `nested` list holds the module's top-level nodes.
    File,

    /// Struct or group with fields.
    Struct(StructNode),

    /// Enum with named enumerants.
    Enum(EnumNode),

    /// Interface with methods.
    Interface(InterfaceNode),

    /// Named constant.
    Const(ConstNode),
}

/// Struct payload.
///
/// Groups are structs with `is_group` set; their fields live inline in the
/// parent's data section but they are distinct nodes with distinct ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructNode {
    /// Fields in declaration order.
    pub fields: Vec<Field>,

    /// Number of union members; zero means no union.
    #[serde(default)]
    pub discriminant_count: u16,

    /// Whether this node is a group rather than a standalone struct.
    #[serde(default)]
    pub is_group: bool,

    /// Generic parameter names, in declaration order.
    #[serde(default)]
    pub generic_params: Vec<String>,
}

impl StructNode {
    /// Create a struct payload with the given fields.
    pub fn new(fields: Vec<Field>) -> Self {
        let discriminant_count = fields.iter().filter(|f| f.is_union_member()).count() as u16;
        Self {
            fields,
            discriminant_count,
            is_group: false,
            generic_params: Vec::new(),
        }
    }

    /// Mark as a group.
    pub fn with_group(mut self, is_group: bool) -> Self {
        self.is_group = is_group;
        self
    }

    /// Declare generic parameters.
    pub fn with_generic_params(mut self, params: Vec<String>) -> Self {
        self.generic_params = params;
        self
    }

    /// Whether any field participates in a union.
    pub fn has_union(&self) -> bool {
        self.discriminant_count > 0
    }

    /// Fields that participate in the union, in declaration order.
    pub fn union_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_union_member())
    }
}

/// Enum payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumNode {
    /// Enumerant names in declaration order.
    pub enumerants: Vec<String>,
}

impl EnumNode {
    /// Create an enum payload with the given enumerants.
    pub fn new(enumerants: Vec<impl Into<String>>) -> Self {
        Self {
            enumerants: enumerants.into_iter().map(Into::into).collect(),
        }
    }
}

/// Interface payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceNode {
    /// Methods in declaration order.
    pub methods: Vec<Method>,

    /// Extended interfaces, in declaration order.
    #[serde(default)]
    pub superclasses: Vec<NodeId>,

    /// Generic parameter names, in declaration order.
    #[serde(default)]
    pub generic_params: Vec<String>,
}

impl InterfaceNode {
    /// Create an interface payload with the given methods.
    pub fn new(methods: Vec<Method>) -> Self {
        Self {
            methods,
            superclasses: Vec::new(),
            generic_params: Vec::new(),
        }
    }

    /// Declare extended interfaces.
    pub fn with_superclasses(mut self, superclasses: Vec<NodeId>) -> Self {
        self.superclasses = superclasses;
        self
    }
}

/// Constant payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstNode {
    /// Declared type of the constant.
    pub type_ref: TypeRef,

    /// Constant value as written in the schema.
    pub value: Value,
}

/// Interface method.
///
/// Parameter and result lists are ordinary struct nodes nested under the
/// interface; the method references them by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Method {
    /// Declared method name.
    pub name: String,

    /// Ordinal within the interface.
    #[serde(default)]
    pub ordinal: u16,

    /// Parameter struct node.
    pub param_struct: NodeId,

    /// Result struct node.
    pub result_struct: NodeId,
}

impl Method {
    /// Create a method referencing its parameter and result structs.
    pub fn new(
        name: impl Into<String>,
        param_struct: impl Into<NodeId>,
        result_struct: impl Into<NodeId>,
    ) -> Self {
        Self {
            name: name.into(),
            ordinal: 0,
            param_struct: param_struct.into(),
            result_struct: result_struct.into(),
        }
    }

    /// Set the ordinal.
    pub fn with_ordinal(mut self, ordinal: u16) -> Self {
        self.ordinal = ordinal;
        self
    }
}

/// A single struct field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Declared field name.
    pub name: String,

    /// Union discriminant, [`DISCRIMINANT_NONE`] for non-members.
    #[serde(default = "discriminant_none")]
    pub discriminant_value: u16,

    /// Slot or group payload.
    pub kind: FieldKind,
}

fn discriminant_none() -> u16 {
    DISCRIMINANT_NONE
}

impl Field {
    /// Create a slot field with the given type.
    pub fn slot(name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            discriminant_value: DISCRIMINANT_NONE,
            kind: FieldKind::Slot {
                type_ref,
                default_value: None,
                had_explicit_default: false,
            },
        }
    }

    /// Create a group field referencing its group node.
    pub fn group(name: impl Into<String>, type_id: impl Into<NodeId>) -> Self {
        Self {
            name: name.into(),
            discriminant_value: DISCRIMINANT_NONE,
            kind: FieldKind::Group {
                type_id: type_id.into(),
            },
        }
    }

    /// Set the union discriminant.
    pub fn with_discriminant(mut self, discriminant: u16) -> Self {
        self.discriminant_value = discriminant;
        self
    }

    /// Set an explicit default value on a slot field. No-op for groups.
    pub fn with_default(mut self, value: Value) -> Self {
        if let FieldKind::Slot {
            default_value,
            had_explicit_default,
            ..
        } = &mut self.kind
        {
            *default_value = Some(value);
            *had_explicit_default = true;
        }
        self
    }

    /// Whether this field participates in its struct's union.
    pub fn is_union_member(&self) -> bool {
        self.discriminant_value != DISCRIMINANT_NONE
    }

    /// The slot type, if this field is a slot.
    pub fn slot_type(&self) -> Option<&TypeRef> {
        match &self.kind {
            FieldKind::Slot { type_ref, .. } => Some(type_ref),
            FieldKind::Group { .. } => None,
        }
    }

    /// The group node id, if this field is a group.
    pub fn group_id(&self) -> Option<NodeId> {
        match &self.kind {
            FieldKind::Group { type_id } => Some(*type_id),
            FieldKind::Slot { .. } => None,
        }
    }
}

/// Field payload: a typed slot or a reference to a group node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldKind {
    /// Regular typed field.
    #[serde(rename_all = "camelCase")]
    Slot {
        /// Declared type.
        type_ref: TypeRef,

        /// Default value, if the schema declared one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<Value>,

        /// Whether the default was written explicitly in the schema.
        #[serde(default)]
        had_explicit_default: bool,
    },

    /// Group field; the group's own fields live on the referenced node.
    #[serde(rename_all = "camelCase")]
    Group {
        /// The group node.
        type_id: NodeId,
    },
}

/// A type expression at a use site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TypeRef {
    Void,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Text,
    Data,

    /// Homogeneous list.
    List {
        /// Element type.
        element: Box<TypeRef>,
    },

    /// Reference to an enum node.
    Enum {
        /// Target node id.
        target: NodeId,
    },

    /// Reference to a struct node, with per-use-site generic bindings.
    #[serde(rename_all = "camelCase")]
    Struct {
        /// Target node id.
        target: NodeId,

        /// Generic bindings at this use site.
        #[serde(default, skip_serializing_if = "Brand::is_empty")]
        brand: Brand,
    },

    /// Reference to an interface node, with per-use-site generic bindings.
    #[serde(rename_all = "camelCase")]
    Interface {
        /// Target node id.
        target: NodeId,

        /// Generic bindings at this use site.
        #[serde(default, skip_serializing_if = "Brand::is_empty")]
        brand: Brand,
    },

    /// Untyped pointer.
    AnyPointer,

    /// Occurrence of a generic parameter declared by an enclosing scope.
    #[serde(rename_all = "camelCase")]
    GenericParam {
        /// Node that declares the parameter.
        scope: NodeId,

        /// Index into the declaring node's parameter list.
        index: u16,
    },
}

impl TypeRef {
    /// Create a list of the given element type.
    pub fn list(element: TypeRef) -> Self {
        TypeRef::List {
            element: Box::new(element),
        }
    }

    /// Create an unbranded struct reference.
    pub fn struct_ref(target: impl Into<NodeId>) -> Self {
        TypeRef::Struct {
            target: target.into(),
            brand: Brand::default(),
        }
    }

    /// Create a branded struct reference.
    pub fn struct_branded(target: impl Into<NodeId>, brand: Brand) -> Self {
        TypeRef::Struct {
            target: target.into(),
            brand,
        }
    }

    /// Create an enum reference.
    pub fn enum_ref(target: impl Into<NodeId>) -> Self {
        TypeRef::Enum {
            target: target.into(),
        }
    }

    /// Create an unbranded interface reference.
    pub fn interface_ref(target: impl Into<NodeId>) -> Self {
        TypeRef::Interface {
            target: target.into(),
            brand: Brand::default(),
        }
    }

    /// Create a generic-parameter occurrence.
    pub fn generic_param(scope: impl Into<NodeId>, index: u16) -> Self {
        TypeRef::GenericParam {
            scope: scope.into(),
            index,
        }
    }

    /// Whether this is a fixed-size scalar (or void) type.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            TypeRef::Void
                | TypeRef::Bool
                | TypeRef::Int8
                | TypeRef::Int16
                | TypeRef::Int32
                | TypeRef::Int64
                | TypeRef::UInt8
                | TypeRef::UInt16
                | TypeRef::UInt32
                | TypeRef::UInt64
                | TypeRef::Float32
                | TypeRef::Float64
        )
    }

    /// Whether this type is stored as a pointer.
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            TypeRef::Text
                | TypeRef::Data
                | TypeRef::List { .. }
                | TypeRef::Struct { .. }
                | TypeRef::Interface { .. }
                | TypeRef::AnyPointer
                | TypeRef::GenericParam { .. }
        )
    }

    /// The referenced node id, if this type targets a named node.
    pub fn target(&self) -> Option<NodeId> {
        match self {
            TypeRef::Enum { target }
            | TypeRef::Struct { target, .. }
            | TypeRef::Interface { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// The generic bindings at this use site, if any.
    pub fn brand(&self) -> Option<&Brand> {
        match self {
            TypeRef::Struct { brand, .. } | TypeRef::Interface { brand, .. } => Some(brand),
            _ => None,
        }
    }
}

/// Generic bindings at a use site.
///
/// Bindings are positional against the target node's parameter list; an empty
/// brand leaves every parameter unbound. Two different brands of one node are
/// two type expressions over the same node, never two nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Brand {
    /// Bound types, positionally.
    pub bindings: Vec<TypeRef>,
}

impl Brand {
    /// Create a brand binding the given types positionally.
    pub fn new(bindings: Vec<TypeRef>) -> Self {
        Self { bindings }
    }

    /// Whether no parameters are bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// The binding for the given parameter index, if present.
    pub fn binding(&self, index: u16) -> Option<&TypeRef> {
        self.bindings.get(index as usize)
    }
}

/// One compiled schema module as produced by the external compiler front
/// half.
///
/// `nodes` carries the module's own definitions plus every transitively
/// imported definition, each annotated with its owning `module` path, so that
/// modules sharing an import overlap in the registry and deduplicate by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedModule {
    /// Document version, currently [`SCHEMA_VERSION`].
    #[serde(default = "schema_version")]
    pub schema_version: u32,

    /// File-scope node of this module.
    pub root_id: NodeId,

    /// Source path of the schema file.
    pub path: PathBuf,

    /// Import paths as written in the schema. A leading `/` marks an
    /// absolute import resolved against the caller's import roots.
    #[serde(default)]
    pub imports: Vec<String>,

    /// All nodes visible to this module.
    pub nodes: Vec<Node>,
}

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

impl LoadedModule {
    /// Create a module with the given root and node set.
    pub fn new(root_id: impl Into<NodeId>, path: impl Into<PathBuf>, nodes: Vec<Node>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            root_id: root_id.into(),
            path: path.into(),
            imports: Vec::new(),
            nodes,
        }
    }

    /// Declare imports as written in the schema.
    pub fn with_imports(mut self, imports: Vec<impl Into<String>>) -> Self {
        self.imports = imports.into_iter().map(Into::into).collect();
        self
    }

    /// Output stem for this module's generated files.
    ///
    /// `addressbook.capnp` becomes `addressbook_capnp`; hyphens are folded to
    /// underscores so the stem is a valid Python module name.
    pub fn stub_stem(&self) -> String {
        stub_stem(&self.path)
    }
}

/// Output stem for a schema path, shared with import-edge rendering.
pub fn stub_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.replace(['.', '-'], "_")
}
