use std::path::PathBuf;

use crate::report::{Failure, FailureKind};
use crate::{fsutil, mounts};

/// Errors that may occur while resolving cgroup paths or reading limits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Mounts(#[from] mounts::Error),
    #[error(transparent)]
    Read(#[from] fsutil::ReadError),
    #[error("malformed cgroup membership line {line} in `{path}`: `{content}`")]
    MalformedMembership {
        path: PathBuf,
        line: usize,
        content: String,
    },
    #[error("no `{controller}` entry in `{path}`")]
    MissingMembership { path: PathBuf, controller: String },
    #[error("no candidate directory for `{controller}` exists (tried {tried})")]
    NoCandidate { controller: String, tried: String },
}

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        match err {
            Error::Mounts(err) => err.into(),
            Error::Read(err) => err.into(),
            Error::MalformedMembership { .. } => Failure::new(FailureKind::Malformed, err.to_string()),
            Error::MissingMembership { .. } | Error::NoCandidate { .. } => {
                Failure::new(FailureKind::NotFound, err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
