//! Write-to-temp-then-rename replacement of target files.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use trel_common::{Result, TrelError};

/// Replace `path` with whatever `write` produces.
///
/// The content goes to a temporary file in the same directory, is synced, then renamed over
/// `path`. If `write` or any step before the rename fails, `path` is left untouched and the
/// temporary file is removed.
pub fn replace_atomically<F>(path: &Path, temp_prefix: &str, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(temp_prefix)
        .tempfile_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| TrelError::Io(e.error))?;
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_dir(prefix: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}_{nanos}"));
        fs::create_dir_all(&dir).expect("create dir");
        dir
    }

    #[test]
    fn failed_writes_leave_the_target_intact() {
        let dir = unique_dir("trel_atomic");
        let target = dir.join("data.bin");
        fs::write(&target, b"old").expect("seed");

        let err = replace_atomically(&target, ".trel-tmp-", |f| {
            f.write_all(b"partial")?;
            Err(TrelError::Execution("encoder failed".to_string()))
        })
        .expect_err("write failure");
        assert!(matches!(err, TrelError::Execution(_)));
        assert_eq!(fs::read(&target).expect("read"), b"old");
        let leftovers = fs::read_dir(&dir)
            .expect("list")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".trel-tmp-"))
            .count();
        assert_eq!(leftovers, 0);

        replace_atomically(&target, ".trel-tmp-", |f| Ok(f.write_all(b"new")?)).expect("replace");
        assert_eq!(fs::read(&target).expect("read"), b"new");
        let _ = fs::remove_dir_all(dir);
    }
}
