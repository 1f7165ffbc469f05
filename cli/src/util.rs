use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

pub fn current_dir() -> anyhow::Result<PathBuf> {
    std::env::current_dir().context("Failed to get current dir")
}

pub fn replace_homedir_to_tilde(path: impl Into<PathBuf>) -> PathBuf {
    let path = path.into();
    let Some(home_dir) = ::dirs::home_dir() else {
        return path
    };
    path.strip_prefix(home_dir)
        .map(|path| Path::new("~").join(path))
        .unwrap_or(path)
}

/// Contents of `path`, or of stdin when `path` is `-`.
pub fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    Ok(fsutil::read_to_string(path)?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tilde_only_replaces_the_home_prefix() {
        assert_eq!(
            replace_homedir_to_tilde("/definitely/not/home"),
            PathBuf::from("/definitely/not/home")
        );
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                replace_homedir_to_tilde(home.join("q1/answer.py")),
                PathBuf::from("~/q1/answer.py")
            );
        }
    }

    #[test]
    fn read_input_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answer.py");
        fsutil::write(&path, "print(1)\n").unwrap();
        assert_eq!(read_input(&path).unwrap(), "print(1)\n");
        assert!(read_input(&dir.path().join("missing.py")).is_err());
    }
}
