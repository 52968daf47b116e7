use arbor_path::PathError;
use thiserror::Error;

/// Problems with a model definition itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("model name must not be empty")]
    EmptyName,
    #[error("model `{model}` declares `{name}` more than once")]
    DuplicateMember { model: String, name: String },
    #[error("model `{model}` cannot declare `{name}`: the name is reserved for the model tag")]
    ReservedMember { model: String, name: String },
    #[error("initial state of model `{model}` must be a record")]
    InitialNotRecord { model: String },
    #[error("initial state of model `{model}` has a field named like its member `{name}`")]
    FieldShadowsMember { model: String, name: String },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("state at `{path}` can only be modified inside an action")]
    MutationOutsideAction { path: String },
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("model `{model}` has no action `{name}`")]
    UnknownAction { model: String, name: String },
    #[error("model `{model}` has no view `{name}`")]
    UnknownView { model: String, name: String },
    #[error("node is not a record")]
    NotARecord,
    #[error("node is not a list")]
    NotAList,
    #[error("index {index} is out of bounds for a list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("node has been released from the state tree")]
    Detached,
    #[error("an instance cannot be attached inside its own subtree")]
    Cycle,
    #[error("instance belongs to a different store")]
    ForeignInstance,
    #[error("overrides must be a record or null")]
    InvalidOverrides,
    #[error("invalid path: {0}")]
    Path(#[from] PathError),
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub fn is_mutation_outside_action(&self) -> bool {
        matches!(self, ModelError::MutationOutsideAction { .. })
    }
}
