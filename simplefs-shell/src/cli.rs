use std::path::PathBuf;

use clap::Parser;
use simplefs::io::{DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE};

/// Interactive shell over a simplefs image file.
#[derive(Parser)]
#[command(version)]
pub struct Cli {
    /// Image file holding the filesystem
    #[arg(long, short, default_value = "storage.bin")]
    pub file: PathBuf,

    /// Format a new filesystem with N inodes and exit
    #[arg(long, value_name = "N")]
    pub mkfs: Option<usize>,

    /// Block size of the image in bytes
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Number of blocks in the image
    #[arg(long, default_value_t = DEFAULT_BLOCK_COUNT)]
    pub blocks: usize,
}
