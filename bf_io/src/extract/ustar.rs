//! Minimal POSIX tar reader.
//!
//! Handles regular files and directories; other entry types are skipped.
//! Long names come from the ustar prefix field, a pax `path` record or a GNU
//! `L` entry. Entries whose path would leave the destination are skipped.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bf_core::Error;

const BLOCK: usize = 512;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnpackStats {
    pub files: usize,
    pub directories: usize,
    pub skipped: usize,
}

struct Header {
    name: String,
    mode: Option<u32>,
    size: u64,
    typeflag: u8,
}

impl Header {
    fn parse(block: &[u8; BLOCK]) -> Result<Self, String> {
        let name = cstr(&block[0..100]);
        let mode = octal(&block[100..108]).ok().map(|m| m as u32);
        let size = size_field(&block[124..136])?;
        let typeflag = block[156];
        // GNU headers ("ustar  \0") keep atime/ctime where ustar keeps the prefix.
        let prefix = if &block[257..263] == b"ustar\0" {
            cstr(&block[345..500])
        } else {
            String::new()
        };
        let name = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        Ok(Self {
            name,
            mode,
            size,
            typeflag,
        })
    }
}

fn cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn octal(field: &[u8]) -> Result<u64, String> {
    let text = cstr(field);
    let text = text.trim_matches(|c: char| c == ' ' || c == '\0');
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(text, 8).map_err(|_| format!("invalid octal field '{text}'"))
}

/// Size is octal ASCII, or big-endian base-256 when the high bit is set.
fn size_field(field: &[u8]) -> Result<u64, String> {
    if field[0] & 0x80 != 0 {
        let mut value: u64 = u64::from(field[0] & 0x7f);
        for &b in &field[1..] {
            value = value
                .checked_mul(256)
                .and_then(|v| v.checked_add(u64::from(b)))
                .ok_or_else(|| "size field overflows".to_string())?;
        }
        return Ok(value);
    }
    octal(field)
}

fn padded(size: u64) -> u64 {
    size.div_ceil(BLOCK as u64) * BLOCK as u64
}

/// Joins an archive path under `dest`, refusing absolute paths and `..`.
fn safe_join(dest: &Path, name: &str) -> Option<PathBuf> {
    let mut out = dest.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (depth > 0).then_some(out)
}

fn read_block<R: Read>(reader: &mut R, block: &mut [u8; BLOCK]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < BLOCK {
        let n = reader.read(&mut block[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated tar header",
            ));
        }
        filled += n;
    }
    Ok(true)
}

fn read_body<R: Read>(reader: &mut R, size: u64) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.by_ref().take(size).read_to_end(&mut data)?;
    if (data.len() as u64) < size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated tar entry",
        ));
    }
    skip(reader, padded(size) - size)?;
    Ok(data)
}

fn skip<R: Read>(reader: &mut R, n: u64) -> io::Result<()> {
    let copied = io::copy(&mut reader.by_ref().take(n), &mut io::sink())?;
    if copied < n {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated tar entry",
        ));
    }
    Ok(())
}

/// `path` value from a pax extended header body.
fn pax_path(data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(data);
    let records: HashMap<&str, &str> = text
        .lines()
        .filter_map(|line| line.split_once(' ').map(|(_, kv)| kv))
        .filter_map(|kv| kv.split_once('='))
        .collect();
    records.get("path").map(|p| p.to_string())
}

/// Unpacks an uncompressed tar stream into `dest`.
pub fn unpack<R: Read>(
    mut reader: R,
    dest: &Path,
    archive: &Path,
    cancel: &CancellationToken,
) -> Result<UnpackStats, Error> {
    let fail = |message: String| Error::ExtractionFailed {
        archive: archive.to_path_buf(),
        message,
    };

    fs::create_dir_all(dest).map_err(|e| Error::fs(dest, e))?;
    let mut stats = UnpackStats::default();
    let mut block = [0u8; BLOCK];
    let mut long_name: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !read_block(&mut reader, &mut block).map_err(|e| fail(e.to_string()))? {
            break;
        }
        if block.iter().all(|&b| b == 0) {
            break;
        }

        let header = Header::parse(&block).map_err(&fail)?;
        match header.typeflag {
            b'x' | b'L' => {
                let data = read_body(&mut reader, header.size).map_err(|e| fail(e.to_string()))?;
                long_name = if header.typeflag == b'L' {
                    Some(cstr(&data))
                } else {
                    pax_path(&data)
                };
                continue;
            }
            b'g' => {
                skip(&mut reader, padded(header.size)).map_err(|e| fail(e.to_string()))?;
                continue;
            }
            _ => {}
        }

        let name = long_name.take().unwrap_or(header.name);
        let Some(target) = safe_join(dest, &name) else {
            warn!(entry = %name, "skipping tar entry outside destination");
            skip(&mut reader, padded(header.size)).map_err(|e| fail(e.to_string()))?;
            stats.skipped += 1;
            continue;
        };

        match header.typeflag {
            b'5' => {
                fs::create_dir_all(&target).map_err(|e| Error::fs(&target, e))?;
                stats.directories += 1;
            }
            b'0' | 0 => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
                }
                let mut out = fs::File::create(&target).map_err(|e| Error::fs(&target, e))?;
                let copied = io::copy(&mut reader.by_ref().take(header.size), &mut out)
                    .map_err(|e| fail(e.to_string()))?;
                if copied < header.size {
                    return Err(fail(format!("truncated entry '{name}'")));
                }
                skip(&mut reader, padded(header.size) - header.size)
                    .map_err(|e| fail(e.to_string()))?;
                set_mode(&target, header.mode);
                stats.files += 1;
            }
            other => {
                debug!(entry = %name, typeflag = other, "skipping unsupported tar entry");
                skip(&mut reader, padded(header.size)).map_err(|e| fail(e.to_string()))?;
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode
        && mode & 0o111 != 0
    {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777));
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::{Builder, EntryType, Header as TarHeader};
    use tempfile::TempDir;

    fn append_file(builder: &mut Builder<Vec<u8>>, path: &str, data: &[u8], mode: u32) {
        let mut header = TarHeader::new_ustar();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_entry_type(EntryType::Regular);
        builder.append_data(&mut header, path, data).unwrap();
    }

    fn tarball(build: impl FnOnce(&mut Builder<Vec<u8>>)) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        build(&mut builder);
        builder.into_inner().unwrap()
    }

    /// Recomputes the first header's checksum after hand edits.
    fn reseal(data: &mut [u8]) {
        let sum: u32 = data[..512]
            .iter()
            .enumerate()
            .map(|(i, &b)| if (148..156).contains(&i) { 32 } else { u32::from(b) })
            .sum();
        data[148..156].copy_from_slice(format!("{sum:06o}\0 ").as_bytes());
    }

    fn run(data: &[u8], dest: &Path) -> Result<UnpackStats, Error> {
        unpack(data, dest, Path::new("test.tar"), &CancellationToken::new())
    }

    #[test]
    fn unpacks_files_and_directories() {
        let data = tarball(|b| {
            let mut dir = TarHeader::new_ustar();
            dir.set_entry_type(EntryType::Directory);
            dir.set_size(0);
            dir.set_mode(0o755);
            b.append_data(&mut dir, "package/vendor/", &[][..]).unwrap();
            append_file(b, "package/cli.js", b"console.log(1)", 0o644);
            append_file(b, "package/vendor/rg", b"\x7fELF", 0o755);
        });

        let tmp = TempDir::new().unwrap();
        let stats = run(&data, tmp.path()).unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 1);
        assert_eq!(
            fs::read_to_string(tmp.path().join("package/cli.js")).unwrap(),
            "console.log(1)"
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(tmp.path().join("package/vendor/rg"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn long_paths_use_prefix_field() {
        let deep = format!("package/{}/file.txt", "d".repeat(120));
        let data = tarball(|b| append_file(b, &deep, b"deep", 0o644));

        let tmp = TempDir::new().unwrap();
        run(&data, tmp.path()).unwrap();
        assert_eq!(fs::read_to_string(tmp.path().join(&deep)).unwrap(), "deep");
    }

    #[test]
    fn symlinks_are_skipped_without_error() {
        let data = tarball(|b| {
            append_file(b, "package/real.js", b"x", 0o644);
            let mut link = TarHeader::new_ustar();
            link.set_entry_type(EntryType::Symlink);
            link.set_size(0);
            b.append_link(&mut link, "package/link.js", "real.js").unwrap();
        });

        let tmp = TempDir::new().unwrap();
        let stats = run(&data, tmp.path()).unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(!tmp.path().join("package/link.js").exists());
    }

    #[test]
    fn traversal_entries_are_skipped() {
        let mut data = tarball(|b| append_file(b, "package/ok.txt", b"ok", 0o644));
        // Hand-patch the name so `tar` doesn't refuse to write it.
        let evil = b"../evil.txt";
        data[..100].fill(0);
        data[..evil.len()].copy_from_slice(evil);
        reseal(&mut data);

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let stats = run(&data, &dest).unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[test]
    fn truncated_archive_fails() {
        let data = tarball(|b| append_file(b, "package/big.bin", &[1u8; 4096], 0o644));
        let tmp = TempDir::new().unwrap();
        let err = run(&data[..1024], tmp.path()).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
    }

    #[test]
    fn cancelled_before_start() {
        let data = tarball(|b| append_file(b, "a", b"a", 0o644));
        let tmp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = unpack(&data[..], tmp.path(), Path::new("t.tar"), &cancel).unwrap_err();
        assert_eq!(err, Error::Cancelled);
    }

    #[test]
    fn octal_fields_tolerate_padding() {
        assert_eq!(octal(b"0000644 \0").unwrap(), 0o644);
        assert_eq!(octal(b"\0\0\0").unwrap(), 0);
        assert!(octal(b"zz").is_err());
    }

    #[test]
    fn pax_path_record_is_read() {
        let body = b"30 path=package/a/very/long.js\n";
        assert_eq!(pax_path(body).as_deref(), Some("package/a/very/long.js"));
    }

    #[test]
    fn gnu_access_times_are_not_read_as_prefix() {
        let mut data = tarball(|b| {
            let mut header = TarHeader::new_gnu();
            header.set_path("package/cli.js").unwrap();
            header.set_size(2);
            header.set_mode(0o644);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            b.append(&header, &b"ok"[..]).unwrap();
        });
        assert_eq!(&data[257..265], b"ustar  \0");
        // GNU atime field.
        data[345..357].copy_from_slice(b"14571201652\0");
        reseal(&mut data);

        let tmp = TempDir::new().unwrap();
        run(&data, tmp.path()).unwrap();
        assert_eq!(fs::read_to_string(tmp.path().join("package/cli.js")).unwrap(), "ok");
        assert!(!tmp.path().join("14571201652").exists());
    }
}
