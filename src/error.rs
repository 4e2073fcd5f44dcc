use std::{fmt, io};

use compact_str::CompactString;
use thiserror::Error;

use crate::builder::BuildError;

/// Terminal errors of an advertiser or of the daemon as a whole.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{iface}: {source}")]
    Build {
        iface: CompactString,
        #[source]
        source: BuildError,
    },
    #[error("{iface}: failed to {op}: {source}")]
    Transport {
        iface: CompactString,
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{iface}: failed to {op}: {source}")]
    System {
        iface: CompactString,
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{iface}: {source}")]
    Link {
        iface: CompactString,
        #[source]
        source: io::Error,
    },
    #[error("advertiser task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("{}", Joined(.0))]
    Multiple(Vec<Error>),
}

struct Joined<'a>(&'a [Error]);

impl fmt::Display for Joined<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl Error {
    /// Fold any number of errors into one result. Nested `Multiple`s are
    /// flattened.
    pub fn join(errors: impl IntoIterator<Item = Error>) -> Result<(), Error> {
        let mut flat = Vec::new();
        for e in errors {
            match e {
                Error::Multiple(inner) => flat.extend(inner),
                e => flat.push(e),
            }
        }

        match flat.len() {
            0 => Ok(()),
            1 => Err(flat.remove(0)),
            _ => Err(Error::Multiple(flat)),
        }
    }

    /// The individual errors, however many were joined.
    pub fn errors(&self) -> &[Error] {
        match self {
            Error::Multiple(errs) => errs,
            e => std::slice::from_ref(e),
        }
    }
}
