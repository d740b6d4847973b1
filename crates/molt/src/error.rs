use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: Utf8PathBuf, reason: String },

    #[error("diff engine `{command}` failed: {diagnostic}")]
    Engine {
        command: &'static str,
        diagnostic: String,
    },

    #[error("cyclic view dependency between: {}", views.join(", "))]
    CyclicViewDependency { views: Vec<String> },

    #[error("{path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed changelog {path}: {source}")]
    Deserialization {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

impl Error {
    pub(crate) fn io(path: &camino::Utf8Path, source: std::io::Error) -> Self {
        Error::Io {
            path: path.to_owned(),
            source,
        }
    }
}
