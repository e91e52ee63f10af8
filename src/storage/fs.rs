//! Data directory layout and chain-log access
//!
//! ```text
//! <dataDir>/database/genesis.json   written once at first boot
//! <dataDir>/database/block.db       newline-delimited JSON log of BlockFs
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::consensus::BlockFs;
use crate::storage::StateError;

const DATABASE_DIR_NAME: &str = "database";
const GENESIS_FILE_NAME: &str = "genesis.json";
const BLOCKS_FILE_NAME: &str = "block.db";

pub fn database_dir_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_DIR_NAME)
}

pub fn genesis_file_path(data_dir: &Path) -> PathBuf {
    database_dir_path(data_dir).join(GENESIS_FILE_NAME)
}

pub fn blocks_db_file_path(data_dir: &Path) -> PathBuf {
    database_dir_path(data_dir).join(BLOCKS_FILE_NAME)
}

/// Create the database directory, genesis file and empty block log.
/// Idempotent: an existing genesis file means the directory is initialized
/// and nothing is touched.
pub fn init_data_dir_if_not_exists(data_dir: &Path, genesis: &[u8]) -> Result<(), StateError> {
    if genesis_file_path(data_dir).exists() {
        return Ok(());
    }

    fs::create_dir_all(database_dir_path(data_dir))?;
    fs::write(genesis_file_path(data_dir), genesis)?;
    fs::write(blocks_db_file_path(data_dir), b"")?;

    Ok(())
}

/// Open the chain log for appending and replay
pub fn open_blocks_db(data_dir: &Path) -> Result<File, StateError> {
    let file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(blocks_db_file_path(data_dir))?;
    Ok(file)
}

/// Append one BlockFs line to the log, trailing newline included
pub fn append_block_fs(file: &mut File, envelope: &BlockFs) -> Result<(), StateError> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    file.write_all(&line)?;
    file.flush()?;
    Ok(())
}

/// Stream the chain log, returning every block with `number >= after`.
/// An empty line terminates iteration.
pub fn blocks_after(data_dir: &Path, after: u64) -> Result<Vec<BlockFs>, StateError> {
    let file = File::open(blocks_db_file_path(data_dir))?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            break;
        }
        let envelope: BlockFs = serde_json::from_str(&line)?;
        if envelope.value.header.number >= after {
            out.push(envelope);
        }
    }

    Ok(out)
}

/// Expand a leading tilde to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
