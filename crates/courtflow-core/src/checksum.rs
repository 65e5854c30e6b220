use sha2::{Digest, Sha256};

/// Hex SHA-256 of the exact uploaded bytes. Two uploads with the same
/// checksum are the same file.
pub fn file_checksum(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    format!("{:x}", hasher.finalize())
}
