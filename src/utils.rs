pub mod http;
pub mod image;
pub mod limiter;
pub mod paths;

use std::path::Path;

/// 删除目录下的所有文件 (保留目录本身)，目录不存在时忽略
pub fn clear_dir_files(dir: &Path) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// 文件存在则删除
pub fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        std::fs::remove_file(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn clear_dir_keeps_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("1.png"), b"x").unwrap();
        std::fs::write(dir.path().join("2.png"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        assert_eq!(clear_dir_files(dir.path()).unwrap(), 2);
        assert!(dir.path().join("sub").exists());
        assert_eq!(clear_dir_files(&dir.path().join("missing")).unwrap(), 0);
    }
}
