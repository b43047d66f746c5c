//! Error types and result definitions for oracle operations.
//!
//! [`OracleError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, an optional source and the location where it was raised. Failures of several
//! scenarios can be aggregated into one error.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for oracle operations.
pub type OracleResult<T> = Result<T, OracleError>;

/// Payload stored for single [`OracleError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Main error type of the oracle.
#[derive(Debug, Clone)]
pub struct OracleError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, e.g. the failed scenarios of a group.
    Many {
        errors: Vec<OracleError>,
        location: &'static Location<'static>,
    },
}

/// Categories of failures the oracle can report.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A collaborator did not become ready; aborts the scenario group.
    StartupFailure,
    /// Fewer messages than expected arrived before the deadline.
    Timeout,
    /// A payload was malformed or its schema could not be resolved.
    DecodeError,
    /// Observed messages do not match the expected delivery semantics.
    AssertionFailure,
    /// Two scenarios of the same group claimed the same table.
    NameCollision,
    /// An operation was called in a lifecycle state that does not allow it.
    InvalidState,
    ConfigError,
    DatabaseQueryFailed,
    BusError,
    RegistryError,
    IoError,
    Unknown,
}

impl ErrorKind {
    /// Returns `true` for failures that abort the whole scenario group.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::StartupFailure)
    }
}

impl OracleError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "multiple errors",
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the location where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error to this error.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        OracleError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
            }),
        }
    }
}

impl PartialEq for OracleError {
    fn eq(&self, other: &OracleError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line()
                )?;

                if let Some(detail) = &payload.detail {
                    for line in detail.lines() {
                        write!(f, "\n  {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, .. } => {
                let count = errors.len();
                write!(
                    f,
                    "{} error{}",
                    count,
                    if count == 1 { "" } else { "s" }
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    if let Some(first_line) = lines.next() {
                        write!(f, "\n  {}. {first_line}", index + 1)?;
                    }
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for OracleError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates an [`OracleError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for OracleError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> OracleError {
        OracleError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates an [`OracleError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for OracleError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> OracleError {
        OracleError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates several errors; a single error is returned unwrapped.
impl<E> From<Vec<E>> for OracleError
where
    E: Into<OracleError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> OracleError {
        let location = Location::caller();
        let mut errors: Vec<OracleError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        OracleError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for OracleError {
    #[track_caller]
    fn from(err: std::io::Error) -> OracleError {
        let detail = err.to_string();
        OracleError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// JSON failures only happen while decoding payloads or registry responses.
impl From<serde_json::Error> for OracleError {
    #[track_caller]
    fn from(err: serde_json::Error) -> OracleError {
        let detail = err.to_string();
        OracleError::from_components(
            ErrorKind::DecodeError,
            Cow::Borrowed("JSON decoding failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<apache_avro::Error> for OracleError {
    #[track_caller]
    fn from(err: apache_avro::Error) -> OracleError {
        let detail = err.to_string();
        OracleError::from_components(
            ErrorKind::DecodeError,
            Cow::Borrowed("Avro decoding failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<tokio_postgres::Error> for OracleError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> OracleError {
        let detail = match err.as_db_error() {
            Some(db_error) => format!("{}: {}", db_error.code().code(), db_error.message()),
            None => err.to_string(),
        };
        OracleError::from_components(
            ErrorKind::DatabaseQueryFailed,
            Cow::Borrowed("Postgres statement failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
