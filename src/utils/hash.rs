use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

pub async fn calculate_hash_from_reader<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of a file's contents as lowercase hex, streamed in fixed-size chunks
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let file = tokio::fs::File::open(path).await?;
    calculate_hash_from_reader(file).await
}
