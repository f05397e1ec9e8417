use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use cacheseal_core::EncryptionProvider;
use color_eyre::Result;
use tempfile::NamedTempFile;
use tracing::instrument;

use crate::cli::BlockArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Transform one block read from `args.input` and write it to `args.output`.
#[instrument(skip_all, fields(direction = ?direction, input = %args.input.display()))]
pub async fn transform<P: EncryptionProvider + ?Sized>(
    provider: &P,
    direction: Direction,
    args: &BlockArgs,
) -> Result<usize> {
    let input = fs::read(&args.input)?;
    let deferred = match direction {
        Direction::Encrypt => provider.encrypt_block(Some(input)),
        Direction::Decrypt => provider.decrypt_block(Some(input)),
    }
    .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

    let output = deferred
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    write_atomic(&args.output, &output)?;
    Ok(output.len())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let mut tmp = NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
