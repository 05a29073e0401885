use thiserror::Error;

use crate::retriever::Unavailable;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("template error: {0}")]
    Template(String),

    /// An external tool failed for a reason other than the target being absent.
    #[error("`{command}` failed: {detail}")]
    Transport { command: String, detail: String },

    #[error("requested files are unavailable from every data store: {0}")]
    Unavailable(Unavailable),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    pub(crate) fn transport(command: impl Into<String>, detail: impl ToString) -> Self {
        Error::Transport {
            command: command.into(),
            detail: detail.to_string(),
        }
    }

    /// Process exit status for this error class.
    ///
    /// `1` keeps its historical meaning of "data not found anywhere"; the other
    /// classes get their own codes so a scheduler can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Unavailable(_) => 1,
            Error::Config(_) | Error::InvalidRequest(_) | Error::Template(_) | Error::Yaml(_) => 2,
            Error::Transport { .. } | Error::Http(_) | Error::Io(_) | Error::Json(_) | Error::Url(_) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_separate_error_classes() {
        assert_eq!(Error::Unavailable(Unavailable::default()).exit_code(), 1);
        assert_eq!(Error::Config("no store".into()).exit_code(), 2);
        assert_eq!(Error::transport("htar -xvf a.tar", "exit status 72").exit_code(), 3);
    }
}
