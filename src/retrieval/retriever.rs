use crate::services::CancellationToken;
use derive_more::derive::{Display, Error};
use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

#[derive(Debug, Display, Error)]
pub enum RetrievalError {
    #[display("Retrieval of {url} was canceled.")]
    Canceled { url: String },
    #[display("Retrievals are disabled while offline.")]
    Offline,
    #[display("Resource {url} does not exist.")]
    NotFound { url: String },
    #[display("Unsupported url scheme of {url}.")]
    UnsupportedScheme { url: String },
    #[display("Failed to access {url}: {io}")]
    Io {
        url: String,
        #[error(source)]
        io: io::Error,
    },
}

impl RetrievalError {
    fn from_io(url: &str, io: io::Error) -> Self {
        match io.kind() {
            ErrorKind::NotFound => Self::NotFound {
                url: url.to_string(),
            },
            _ => Self::Io {
                url: url.to_string(),
                io,
            },
        }
    }

    /// Whether the retrieval stopped because it was canceled, as opposed to failed.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. } | Self::Offline)
    }
}

/// Fetches the bytes of a resource.
///
/// Implementations are called on worker threads and should check the token between chunks of work.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, url: &str, token: &CancellationToken) -> Result<Vec<u8>, RetrievalError>;
}

/// Retrieves `file://` urls and plain file system paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileRetriever;

impl FileRetriever {
    fn path_for_url(url: &str) -> Result<PathBuf, RetrievalError> {
        match url.split_once("://") {
            Some(("file", path)) => Ok(PathBuf::from(path)),
            Some(_) => Err(RetrievalError::UnsupportedScheme {
                url: url.to_string(),
            }),
            None => Ok(PathBuf::from(url)),
        }
    }
}

impl Retriever for FileRetriever {
    fn retrieve(&self, url: &str, token: &CancellationToken) -> Result<Vec<u8>, RetrievalError> {
        check_token(url, token)?;

        let path = Self::path_for_url(url)?;
        let bytes = fs::read(path).map_err(|error| RetrievalError::from_io(url, error))?;

        check_token(url, token)?;

        Ok(bytes)
    }
}

fn check_token(url: &str, token: &CancellationToken) -> Result<(), RetrievalError> {
    if token.is_offline() {
        Err(RetrievalError::Offline)
    } else if token.is_canceled() {
        Err(RetrievalError::Canceled {
            url: url.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Retrieves the resource into the local cache file at `path`.
///
/// Returns false without retrieving anything, if the file is already cached.
/// The bytes are written to a temporary file next to the target first, so readers never see partial files.
pub fn retrieve_to_file(
    retriever: &dyn Retriever,
    url: &str,
    path: &Path,
    token: &CancellationToken,
) -> Result<bool, RetrievalError> {
    if path.exists() {
        return Ok(false);
    }

    let bytes = retriever.retrieve(url, token)?;

    let io_error = |error| RetrievalError::Io {
        url: url.to_string(),
        io: error,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let part = path.with_extension("part");
    fs::write(&part, &bytes).map_err(io_error)?;
    fs::rename(&part, path).map_err(io_error)?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::OfflineMode, util::unique_id};
    use std::env;

    fn temp_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("bevy_globe_retriever_{}_{}", std::process::id(), unique_id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn file_urls_and_paths() {
        let dir = temp_dir();
        let source = dir.join("source.bin");
        fs::write(&source, [1u8, 2, 3]).unwrap();

        let token = CancellationToken::new();
        let url = format!("file://{}", source.display());

        assert_eq!(FileRetriever.retrieve(&url, &token).unwrap(), vec![1, 2, 3]);
        assert_eq!(
            FileRetriever.retrieve(&source.to_string_lossy(), &token).unwrap(),
            vec![1, 2, 3]
        );

        let missing = FileRetriever.retrieve(&format!("file://{}", dir.join("missing").display()), &token);
        assert!(matches!(missing, Err(RetrievalError::NotFound { .. })));

        let http = FileRetriever.retrieve("http://example.com/tile.png", &token);
        assert!(matches!(http, Err(RetrievalError::UnsupportedScheme { .. })));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn retrieval_into_the_cache() {
        let dir = temp_dir();
        let source = dir.join("source.bin");
        let target = dir.join("cache/0/1/1_2.bin");
        fs::write(&source, [7u8; 16]).unwrap();

        let token = CancellationToken::new();
        let url = source.to_string_lossy().to_string();

        assert!(retrieve_to_file(&FileRetriever, &url, &target, &token).unwrap());
        assert_eq!(fs::read(&target).unwrap(), vec![7u8; 16]);
        assert!(!target.with_extension("part").exists());

        // already cached
        fs::remove_file(&source).unwrap();
        assert!(!retrieve_to_file(&FileRetriever, &url, &target, &token).unwrap());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn canceled_and_offline() {
        let offline = OfflineMode::default();
        let token = CancellationToken::with_offline_mode(offline.clone());

        offline.set_offline(true);
        let error = FileRetriever.retrieve("tile.png", &token).unwrap_err();
        assert!(matches!(error, RetrievalError::Offline));
        assert!(error.is_canceled());

        offline.set_offline(false);
        token.cancel();
        let error = FileRetriever.retrieve("tile.png", &token).unwrap_err();
        assert!(matches!(error, RetrievalError::Canceled { .. }));
    }
}
