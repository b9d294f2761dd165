use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bf_core::Error;

/// A file being written next to its final location. It only appears at the
/// final path on [`PartialFile::commit`]; dropping it uncommitted removes the
/// temporary file.
pub struct PartialFile {
    file: fs::File,
    tmp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl PartialFile {
    pub fn create(final_path: &Path) -> Result<Self, Error> {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
        }
        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        let tmp_path =
            final_path.with_file_name(format!(".{file_name}.{}.part", std::process::id()));
        let file = fs::File::create(&tmp_path).map_err(|e| Error::fs(&tmp_path, e))?;

        Ok(Self {
            file,
            tmp_path,
            final_path: final_path.to_path_buf(),
            committed: false,
        })
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    pub fn commit(mut self) -> Result<PathBuf, Error> {
        self.file
            .flush()
            .map_err(|e| Error::fs(&self.tmp_path, e))?;
        fs::rename(&self.tmp_path, &self.final_path)
            .map_err(|e| Error::fs(&self.final_path, e))?;
        self.committed = true;
        Ok(self.final_path.clone())
    }
}

impl Write for PartialFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed && self.tmp_path.exists() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn committed_write_lands_at_final_path() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("pkg.tgz");

        let mut part = PartialFile::create(&dest).unwrap();
        part.write_all(b"tarball bytes").unwrap();
        let path = part.commit().unwrap();

        assert_eq!(path, dest);
        assert_eq!(fs::read(&dest).unwrap(), b"tarball bytes");
    }

    #[test]
    fn dropped_write_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("pkg.tgz");

        {
            let mut part = PartialFile::create(&dest).unwrap();
            part.write_all(b"half a tarb").unwrap();
            assert!(part.tmp_path().exists());
        }

        assert!(!dest.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_parent_directories_are_created() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("a/b/pkg.tgz");
        let part = PartialFile::create(&dest).unwrap();
        part.commit().unwrap();
        assert!(dest.exists());
    }
}
