//! File manifest of an export.
//!
//! Each downloaded device yields a [`ManifestEntry`]. The ordered entries are
//! submitted to the server to generate the OVF descriptor, and their checksums
//! make up the `.mf` file written next to it.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// One downloaded disk file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Device key on the VM.
    pub device_key: String,
    /// File name relative to the target directory (the device target id).
    pub path: String,
    /// Bytes written.
    pub size: u64,
    /// Lowercase hex SHA-256 of the file contents.
    pub sha256: String,
}

/// Compute the lowercase hex SHA-256 of `data`.
pub fn compute_sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Render `.mf` content: one `SHA256(<file>)= <hex>` line per file, disks
/// first in download order, then the descriptor.
pub fn render_checksums(entries: &[ManifestEntry], descriptor_name: &str, descriptor_sha256: &str) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!("SHA256({})= {}\n", entry.path, entry.sha256));
    }
    out.push_str(&format!("SHA256({descriptor_name})= {descriptor_sha256}\n"));
    out
}

/// Write the `.mf` file to `path`.
pub fn write_checksums(
    path: &Path,
    entries: &[ManifestEntry],
    descriptor_name: &str,
    descriptor: &[u8],
) -> Result<()> {
    let content = render_checksums(entries, descriptor_name, &compute_sha256(descriptor));
    fs::write(path, content).map_err(|e| Error::io(e, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, sha256: &str) -> ManifestEntry {
        ManifestEntry {
            device_key: "/vm-1/VirtualLsiLogicController0:0".into(),
            path: path.into(),
            size: 0,
            sha256: sha256.into(),
        }
    }

    #[test]
    fn test_compute_sha256() {
        assert_eq!(
            compute_sha256(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_render_checksums_order() {
        let entries = vec![entry("disk-0.vmdk", "aa"), entry("disk-1.vmdk", "bb")];
        let mf = render_checksums(&entries, "web01.ovf", "cc");
        assert_eq!(
            mf,
            "SHA256(disk-0.vmdk)= aa\nSHA256(disk-1.vmdk)= bb\nSHA256(web01.ovf)= cc\n"
        );
    }

    #[test]
    fn test_write_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web01.mf");
        write_checksums(&path, &[], "web01.ovf", b"hello world").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "SHA256(web01.ovf)= b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9\n"
        );
    }
}
