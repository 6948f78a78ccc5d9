use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("file '{}' does not exist", path.display())]
    Missing { path: PathBuf },

    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn file_exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

pub fn ensure_file_exists(path: impl AsRef<Path>) -> Result<(), FsError> {
    let path = path.as_ref();
    if file_exists(path) {
        Ok(())
    } else {
        Err(FsError::Missing {
            path: path.to_path_buf(),
        })
    }
}

/// Reads the whole file into memory.
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>, FsError> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|source| FsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_file_is_found_and_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"\x00\x01weights").expect("write");

        assert!(file_exists(&path));
        ensure_file_exists(&path).expect("exists");
        assert_eq!(read_file(&path).expect("read"), b"\x00\x01weights");
    }

    #[test]
    fn directories_do_not_count_as_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!file_exists(dir.path()));
        let err = ensure_file_exists(dir.path()).unwrap_err();
        assert!(matches!(err, FsError::Missing { .. }));
    }

    #[test]
    fn read_error_names_the_file() {
        let err = read_file("/no/such/model.onnx").unwrap_err();
        assert!(err.to_string().contains("/no/such/model.onnx"));
    }
}
