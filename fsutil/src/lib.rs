use serde::de::DeserializeOwned;
use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

pub mod error {
    use std::{io, path::PathBuf};

    pub type Result<T> = std::result::Result<T, self::Error>;

    type Msg = &'static str;

    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        #[error("{0} ({1}): {2}")]
        SingleIO(Msg, PathBuf, #[source] io::Error),

        #[error("Cannot deserialize from JSON (src='{0}'): {1}")]
        DeserializeFromJson(PathBuf, #[source] serde_json::Error),
    }
}
pub use error::{Error, Result};

#[must_use]
pub fn mkdir_all(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir).map_err(|e| Error::SingleIO("Cannot create dir", dir.to_owned(), e))
}

#[must_use]
pub fn write<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    fs::write(&filepath, contents)
        .map_err(|e| Error::SingleIO("Cannot write file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn write_with_mkdir<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    if let Some(dir) = filepath.as_ref().parent() {
        self::mkdir_all(dir)?;
    }
    self::write(filepath, contents)
}

#[must_use]
pub fn read_to_string(filepath: impl AsRef<Path>) -> Result<String> {
    fs::read_to_string(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))
}

/// Read a file that may contain arbitrary bytes.
/// Invalid UTF-8 sequences are rendered as `\xNN` escapes rather than replaced,
/// so nothing the candidate wrote is silently lost.
#[must_use]
pub fn read_to_string_escaped(filepath: impl AsRef<Path>) -> Result<String> {
    let bytes = fs::read(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))?;
    Ok(escape_invalid_utf8(&bytes))
}

/// ```
/// use fsutil::escape_invalid_utf8;
///
/// assert_eq!(escape_invalid_utf8(b"abc"), "abc");
/// assert_eq!(escape_invalid_utf8(b"a\xffb"), "a\\xffb");
/// assert_eq!(escape_invalid_utf8("αβ".as_bytes()), "αβ");
/// ```
pub fn escape_invalid_utf8(mut bytes: &[u8]) -> String {
    let mut res = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                res.push_str(valid);
                return res;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                res.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let bad_len = e.error_len().unwrap_or(rest.len());
                for b in &rest[..bad_len] {
                    res.push_str(&format!("\\x{:02x}", b));
                }
                bytes = &rest[bad_len..];
            }
        }
    }
}

#[must_use]
pub fn create_file(filepath: impl AsRef<Path>) -> Result<File> {
    File::create(&filepath)
        .map_err(|e| Error::SingleIO("Cannot create file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn open_file(filepath: impl AsRef<Path>) -> Result<File> {
    File::open(&filepath)
        .map_err(|e| Error::SingleIO("Cannot open file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn remove_file(filepath: impl AsRef<Path>) -> Result<()> {
    fs::remove_file(&filepath)
        .map_err(|e| Error::SingleIO("Cannot remove file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn remove_dir_all(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    fs::remove_dir_all(dir).map_err(|e| Error::SingleIO("Cannot remove dir", dir.to_owned(), e))
}

#[must_use]
pub fn read_json_with_deserialize<P, T>(filepath: P) -> Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let filepath = filepath.as_ref();
    let f = File::open(filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.to_owned(), e))?;
    serde_json::from_reader(BufReader::new(f))
        .map_err(|e| Error::DeserializeFromJson(filepath.to_owned(), e))
}

/// A file that is removed when the handle goes out of scope,
/// whichever way the owning scope is left.
#[derive(Debug)]
pub struct ScopedFile {
    path: PathBuf,
}

impl ScopedFile {
    pub fn create(path: impl Into<PathBuf>) -> Result<(Self, File)> {
        let path = path.into();
        let file = self::create_file(&path)?;
        Ok((Self { path }, file))
    }

    /// Creates the file already filled with `contents`.
    pub fn with_contents(path: impl Into<PathBuf>, contents: impl AsRef<[u8]>) -> Result<Self> {
        let path = path.into();
        self::write(&path, contents)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn read(&self) -> Result<String> {
        self::read_to_string_escaped(&self.path)
    }
}

impl Drop for ScopedFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to clean up {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scoped_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("__stdout__.txt");
        {
            let (scoped, mut f) = ScopedFile::create(&path).unwrap();
            std::io::Write::write_all(&mut f, b"hello\xfe").unwrap();
            drop(f);
            assert_eq!(scoped.read().unwrap(), "hello\\xfe");
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn write_with_mkdir_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/prog.c");
        write_with_mkdir(&path, "int main(){}").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "int main(){}");

        remove_dir_all(dir.path().join("a")).unwrap();
        assert!(!dir.path().join("a").exists());
        assert!(remove_dir_all(dir.path().join("a")).is_err());
    }
}
