//! Error types for stub generation.
//!
//! Fatal conditions abort the run (walker and resolver failures) or the
//! affected module (writer failures); everything recoverable is reported
//! through [`crate::diagnostics`] instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::NodeId;

/// Result alias for generation operations.
pub type GenerateResult<T> = Result<T, GenerateError>;

/// Fatal generation error.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// An imported module could not be located.
    #[error("module `{module}` imports `{import}`, which was not found under any import root")]
    UnresolvedModule {
        /// Module whose import failed to resolve.
        module: PathBuf,
        /// Import path as written in the schema.
        import: String,
    },

    /// A type reference targets a node absent from the loaded graph.
    #[error("module `{module}` references node {id} which is not part of the loaded graph")]
    UnresolvedNode {
        /// Module containing the dangling reference.
        module: PathBuf,
        /// The missing node id.
        id: NodeId,
    },

    /// Two declarations in one module could not be given distinct names.
    #[error("name `{name}` collides in module `{module}` and could not be disambiguated")]
    NameCollision {
        /// Module containing the collision.
        module: PathBuf,
        /// The contested emitted name.
        name: String,
    },

    /// A type expression has no mapping in the target surface.
    #[error("unsupported type reference at `{location}` in module `{module}`: {detail}")]
    UnsupportedTypeReference {
        /// Module containing the reference.
        module: PathBuf,
        /// Field or method the reference appears on.
        location: String,
        /// What made the reference unmappable.
        detail: String,
    },

    /// A generated file could not be written.
    #[error("failed to write `{path}`")]
    Write {
        /// Target path of the failed write.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
}

impl GenerateError {
    /// An import that resolved under no root.
    pub fn unresolved_module(module: impl Into<PathBuf>, import: impl Into<String>) -> Self {
        GenerateError::UnresolvedModule {
            module: module.into(),
            import: import.into(),
        }
    }

    /// A reference to a node missing from the merged node set.
    pub fn unresolved_node(module: impl Into<PathBuf>, id: NodeId) -> Self {
        GenerateError::UnresolvedNode {
            module: module.into(),
            id,
        }
    }

    /// A name that stayed ambiguous after disambiguation.
    pub fn name_collision(module: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        GenerateError::NameCollision {
            module: module.into(),
            name: name.into(),
        }
    }

    /// A type expression outside the mappable surface.
    pub fn unsupported_type(
        module: impl Into<PathBuf>,
        location: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        GenerateError::UnsupportedTypeReference {
            module: module.into(),
            location: location.into(),
            detail: detail.into(),
        }
    }

    /// A failed file write.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GenerateError::Write {
            path: path.into(),
            source,
        }
    }
}
