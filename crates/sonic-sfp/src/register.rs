//! Register file access.
//!
//! Transceiver state is exposed by CPLD/GPIO/EEPROM drivers as path-addressed
//! nodes: single-line ASCII values (`0`/`1`, or hex bitmaps) and binary EEPROM
//! images addressed by byte offset. [`RegisterFile`] is the seam the rest of
//! the crate reads and writes through.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Path-addressed register nodes.
pub trait RegisterFile {
    /// Reads the first line of a text node, without the line terminator.
    fn read_line(&self, path: &Path) -> io::Result<String>;

    /// Overwrites a text node with `value`.
    fn write_line(&self, path: &Path, value: &str) -> io::Result<()>;

    /// Reads `buf.len()` bytes starting at `offset` of a binary node.
    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `data` at `offset` of a binary node.
    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<()>;
}

/// Register file backed by the real filesystem (sysfs).
#[derive(Debug, Clone, Default)]
pub struct SysfsRegisterFile {
    root: Option<PathBuf>,
}

impl SysfsRegisterFile {
    /// Accesses paths as given.
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Resolves every absolute path underneath `root` instead of `/`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Maps a configured node path onto the filesystem.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            None => path.to_path_buf(),
            Some(root) => {
                let relative: PathBuf = path
                    .components()
                    .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                    .collect();
                root.join(relative)
            }
        }
    }
}

impl RegisterFile for SysfsRegisterFile {
    fn read_line(&self, path: &Path) -> io::Result<String> {
        let file = File::open(self.resolve(path))?;
        let mut line = String::new();
        BufReader::new(file).read_line(&mut line)?;
        let trimmed = line.trim_end_matches(['\n', '\r']);
        Ok(trimmed.to_string())
    }

    fn write_line(&self, path: &Path, value: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.resolve(path))?;
        file.write_all(value.as_bytes())?;
        file.flush()
    }

    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = File::open(self.resolve(path))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(self.resolve(path))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()
    }
}

#[derive(Debug, Default)]
struct MemoryNodes {
    nodes: HashMap<PathBuf, Vec<u8>>,
    failing: HashSet<PathBuf>,
    writes: Vec<(PathBuf, String)>,
}

/// In-memory register file.
///
/// Clones share the same nodes, so a test can keep a handle while a poller
/// owns another and change hardware state between samples.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegisterFile {
    inner: Arc<Mutex<MemoryNodes>>,
}

impl MemoryRegisterFile {
    /// Creates an empty register file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a text node.
    pub fn set_text(&self, path: impl Into<PathBuf>, value: &str) {
        self.inner
            .lock()
            .nodes
            .insert(path.into(), format!("{}\n", value).into_bytes());
    }

    /// Sets a binary node.
    pub fn set_bytes(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.inner.lock().nodes.insert(path.into(), bytes);
    }

    /// Returns a copy of a node's contents.
    pub fn bytes(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.inner.lock().nodes.get(path.as_ref()).cloned()
    }

    /// Returns a text node's first line.
    pub fn text(&self, path: impl AsRef<Path>) -> Option<String> {
        self.bytes(path).map(|b| {
            String::from_utf8_lossy(&b)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string()
        })
    }

    /// Makes every access to `path` fail with an I/O error until cleared.
    pub fn set_failing(&self, path: impl Into<PathBuf>, failing: bool) {
        let path = path.into();
        let mut inner = self.inner.lock();
        if failing {
            inner.failing.insert(path);
        } else {
            inner.failing.remove(&path);
        }
    }

    /// Every `write_line` so far, in order.
    pub fn line_writes(&self) -> Vec<(PathBuf, String)> {
        self.inner.lock().writes.clone()
    }

    fn check(inner: &MemoryNodes, path: &Path) -> io::Result<()> {
        if inner.failing.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected failure on {}", path.display()),
            ));
        }
        Ok(())
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{}: no such node", path.display()),
        )
    }
}

impl RegisterFile for MemoryRegisterFile {
    fn read_line(&self, path: &Path) -> io::Result<String> {
        let inner = self.inner.lock();
        Self::check(&inner, path)?;
        let bytes = inner.nodes.get(path).ok_or_else(|| Self::not_found(path))?;
        let text = String::from_utf8_lossy(bytes);
        Ok(text.lines().next().unwrap_or_default().to_string())
    }

    fn write_line(&self, path: &Path, value: &str) -> io::Result<()> {
        let mut inner = self.inner.lock();
        Self::check(&inner, path)?;
        if !inner.nodes.contains_key(path) {
            return Err(Self::not_found(path));
        }
        inner
            .nodes
            .insert(path.to_path_buf(), value.as_bytes().to_vec());
        inner.writes.push((path.to_path_buf(), value.to_string()));
        Ok(())
    }

    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let inner = self.inner.lock();
        Self::check(&inner, path)?;
        let bytes = inner.nodes.get(path).ok_or_else(|| Self::not_found(path))?;
        let start = usize::try_from(offset).map_err(|_| io::ErrorKind::InvalidInput)?;
        let end = start + buf.len();
        if end > bytes.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock();
        Self::check(&inner, path)?;
        let bytes = inner
            .nodes
            .get_mut(path)
            .ok_or_else(|| Self::not_found(path))?;
        let start = usize::try_from(offset).map_err(|_| io::ErrorKind::InvalidInput)?;
        let end = start + data.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_line_strips_newline() {
        let regs = MemoryRegisterFile::new();
        regs.set_text("/sys/a", "ff 0f");
        assert_eq!(regs.read_line(Path::new("/sys/a")).unwrap(), "ff 0f");
    }

    #[test]
    fn test_memory_missing_node() {
        let regs = MemoryRegisterFile::new();
        let err = regs.read_line(Path::new("/sys/missing")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_memory_failing_node() {
        let regs = MemoryRegisterFile::new();
        regs.set_text("/sys/a", "1");
        regs.set_failing("/sys/a", true);
        assert!(regs.read_line(Path::new("/sys/a")).is_err());
        regs.set_failing("/sys/a", false);
        assert_eq!(regs.read_line(Path::new("/sys/a")).unwrap(), "1");
    }

    #[test]
    fn test_memory_binary_access() {
        let regs = MemoryRegisterFile::new();
        regs.set_bytes("/eeprom", vec![0; 128]);
        regs.write_at(Path::new("/eeprom"), 93, &[0x3]).unwrap();
        let mut buf = [0u8; 1];
        regs.read_at(Path::new("/eeprom"), 93, &mut buf).unwrap();
        assert_eq!(buf[0], 0x3);

        let mut past_end = [0u8; 4];
        let err = regs
            .read_at(Path::new("/eeprom"), 126, &mut past_end)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_memory_write_line_records() {
        let regs = MemoryRegisterFile::new();
        regs.set_text("/sys/reset_1", "1");
        regs.write_line(Path::new("/sys/reset_1"), "0").unwrap();
        assert_eq!(regs.text("/sys/reset_1").unwrap(), "0");
        assert_eq!(
            regs.line_writes(),
            vec![(PathBuf::from("/sys/reset_1"), "0".to_string())]
        );
    }

    #[test]
    fn test_sysfs_resolve_with_root() {
        let regs = SysfsRegisterFile::with_root("/tmp/fake");
        assert_eq!(
            regs.resolve(Path::new("/sys/bus/i2c/devices/4-0060/module_present_all")),
            PathBuf::from("/tmp/fake/sys/bus/i2c/devices/4-0060/module_present_all")
        );
        assert_eq!(
            SysfsRegisterFile::new().resolve(Path::new("/sys/x")),
            PathBuf::from("/sys/x")
        );
    }
}
