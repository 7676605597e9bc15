use std::path::PathBuf;

use crate::fsutil;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Read(#[from] fsutil::ReadError),
    #[error("failed to parse line {line} in file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: super::parser::ParseError,
    },
}

impl From<&Error> for crate::report::Failure {
    fn from(err: &Error) -> Self {
        match err {
            Error::Read(err) => err.into(),
            Error::Parse { .. } => {
                crate::report::Failure::new(crate::report::FailureKind::Malformed, err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
