use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Start marker present but the end marker is missing or misplaced.
    StructuralCorruption,
    AlreadyInitialized,
    RegionNotFound,
    ArityMismatch,
    ParameterMissing,
    UnknownTarget,
    UnknownOperation,
    ExternalTool,
    AddressResolution,
    Recipe,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::StructuralCorruption => "structural-corruption",
            ErrorKind::AlreadyInitialized => "already-initialized",
            ErrorKind::RegionNotFound => "region-not-found",
            ErrorKind::ArityMismatch => "arity-mismatch",
            ErrorKind::ParameterMissing => "parameter-missing",
            ErrorKind::UnknownTarget => "unknown-target",
            ErrorKind::UnknownOperation => "unknown-operation",
            ErrorKind::ExternalTool => "external-tool",
            ErrorKind::AddressResolution => "address-resolution",
            ErrorKind::Recipe => "recipe",
            ErrorKind::Io => "io",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    // Prefix the message with outer context, keeping the original kind.
    pub fn context<C: fmt::Display>(self, ctx: C) -> Self {
        Self {
            kind: self.kind,
            msg: format!("{ctx}: {}", self.msg),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::new(ErrorKind::Recipe, err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Recipe, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
