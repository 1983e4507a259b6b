use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Table,
    Index,
    Column,
    Dataset,
    Remote,
    Chunk,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Table => write!(f, "table"),
            ResourceType::Index => write!(f, "index"),
            ResourceType::Column => write!(f, "column"),
            ResourceType::Dataset => write!(f, "dataset"),
            ResourceType::Remote => write!(f, "remote"),
            ResourceType::Chunk => write!(f, "chunk"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapErrorCode {
    InvalidArgument,
    Encode,
    Decode,
    TableAlreadyExists,
    IndexAlreadyExists,
    ColumnAlreadyExists,
    DatasetAlreadyExists,
    RemoteAlreadyExists,
    ChunkAlreadyExists,
    TableNotFound,
    IndexNotFound,
    ColumnNotFound,
    DatasetNotFound,
    RemoteNotFound,
    ChunkNotFound,
    DuplicatePrimaryKey,
    UniqueViolation,
    NotNullViolation,
    TypeMismatch,
    TagInUse,
    UnsupportedOperation,
    ReplicationConfig,
    Remote,
    Cancelled,
    InternalInvariantViolation,
}

impl SnapErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapErrorCode::InvalidArgument => "invalid_argument",
            SnapErrorCode::Encode => "encode",
            SnapErrorCode::Decode => "decode",
            SnapErrorCode::TableAlreadyExists => "table_already_exists",
            SnapErrorCode::IndexAlreadyExists => "index_already_exists",
            SnapErrorCode::ColumnAlreadyExists => "column_already_exists",
            SnapErrorCode::DatasetAlreadyExists => "dataset_already_exists",
            SnapErrorCode::RemoteAlreadyExists => "remote_already_exists",
            SnapErrorCode::ChunkAlreadyExists => "chunk_already_exists",
            SnapErrorCode::TableNotFound => "table_not_found",
            SnapErrorCode::IndexNotFound => "index_not_found",
            SnapErrorCode::ColumnNotFound => "column_not_found",
            SnapErrorCode::DatasetNotFound => "dataset_not_found",
            SnapErrorCode::RemoteNotFound => "remote_not_found",
            SnapErrorCode::ChunkNotFound => "chunk_not_found",
            SnapErrorCode::DuplicatePrimaryKey => "duplicate_primary_key",
            SnapErrorCode::UniqueViolation => "unique_violation",
            SnapErrorCode::NotNullViolation => "not_null_violation",
            SnapErrorCode::TypeMismatch => "type_mismatch",
            SnapErrorCode::TagInUse => "tag_in_use",
            SnapErrorCode::UnsupportedOperation => "unsupported_operation",
            SnapErrorCode::ReplicationConfig => "replication_config",
            SnapErrorCode::Remote => "remote",
            SnapErrorCode::Cancelled => "cancelled",
            SnapErrorCode::InternalInvariantViolation => "internal_invariant_violation",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SnapError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{resource_type} '{resource_id}' already exists")]
    AlreadyExists {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("duplicate primary key in table '{table}': {key}")]
    DuplicatePrimaryKey { table: String, key: String },
    #[error("unique constraint violation on index '{index}' in table '{table}': {key}")]
    UniqueViolation {
        table: String,
        index: String,
        key: String,
    },
    #[error("NOT NULL violation: column '{column}' in table '{table}'")]
    NotNullViolation { table: String, column: String },
    #[error("type mismatch: column '{column}' expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },
    #[error("tag {tag} for column '{column}' was previously used in table '{table}'")]
    TagInUse {
        tag: u64,
        column: String,
        table: String,
    },
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("replication misconfigured: {0}")]
    ReplicationConfig(String),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

impl SnapError {
    pub fn code(&self) -> SnapErrorCode {
        match self {
            SnapError::InvalidArgument(_) => SnapErrorCode::InvalidArgument,
            SnapError::Encode(_) => SnapErrorCode::Encode,
            SnapError::Decode(_) => SnapErrorCode::Decode,
            SnapError::AlreadyExists { resource_type, .. } => match resource_type {
                ResourceType::Table => SnapErrorCode::TableAlreadyExists,
                ResourceType::Index => SnapErrorCode::IndexAlreadyExists,
                ResourceType::Column => SnapErrorCode::ColumnAlreadyExists,
                ResourceType::Dataset => SnapErrorCode::DatasetAlreadyExists,
                ResourceType::Remote => SnapErrorCode::RemoteAlreadyExists,
                ResourceType::Chunk => SnapErrorCode::ChunkAlreadyExists,
            },
            SnapError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Table => SnapErrorCode::TableNotFound,
                ResourceType::Index => SnapErrorCode::IndexNotFound,
                ResourceType::Column => SnapErrorCode::ColumnNotFound,
                ResourceType::Dataset => SnapErrorCode::DatasetNotFound,
                ResourceType::Remote => SnapErrorCode::RemoteNotFound,
                ResourceType::Chunk => SnapErrorCode::ChunkNotFound,
            },
            SnapError::DuplicatePrimaryKey { .. } => SnapErrorCode::DuplicatePrimaryKey,
            SnapError::UniqueViolation { .. } => SnapErrorCode::UniqueViolation,
            SnapError::NotNullViolation { .. } => SnapErrorCode::NotNullViolation,
            SnapError::TypeMismatch { .. } => SnapErrorCode::TypeMismatch,
            SnapError::TagInUse { .. } => SnapErrorCode::TagInUse,
            SnapError::UnsupportedOperation(_) => SnapErrorCode::UnsupportedOperation,
            SnapError::ReplicationConfig(_) => SnapErrorCode::ReplicationConfig,
            SnapError::Remote(_) => SnapErrorCode::Remote,
            SnapError::Cancelled => SnapErrorCode::Cancelled,
            SnapError::InternalInvariantViolation(_) => SnapErrorCode::InternalInvariantViolation,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn not_found(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        SnapError::NotFound {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    pub fn already_exists(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        SnapError::AlreadyExists {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    /// Errors that a retry on the next replication tick may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, SnapError::Remote(_) | SnapError::Cancelled)
    }
}
