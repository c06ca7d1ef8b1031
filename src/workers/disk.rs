use std::{
    convert::Infallible,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    os::unix::fs::OpenOptionsExt,
    path::PathBuf,
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DiskConfig;

use super::cursor::{ChurnCursor, Wrap};

/// Written at the end of a fresh file to give it its full (sparse) length.
const SIZE_MARKER: [u8; 4] = *b"lbsz";

/// Parameters of a single disk churner, i.e. one path of the disk config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskChurnerConfig {
    pub path: PathBuf,
    pub size: u64,
    pub block_size: u64,
    pub step_size: u64,
    pub sleep_msec: u64,
}

impl DiskChurnerConfig {
    pub fn for_path(disk: &DiskConfig, path: PathBuf) -> Self {
        Self {
            path,
            size: disk.size,
            block_size: disk.block_size,
            step_size: disk.step_size,
            sleep_msec: disk.sleep_msec,
        }
    }
}

pub struct DiskChurner {
    config: DiskChurnerConfig,
    file: File,
    block: Vec<u8>,
    read: ChurnCursor,
    write: ChurnCursor,
    write_iteration: u64,
}

impl DiskChurner {
    /// Creates (or truncates) the target file and pre-sizes it.
    pub fn try_new(config: DiskChurnerConfig) -> anyhow::Result<Self> {
        info!(
            "churning disk on {:?} ({} bytes)",
            config.path, config.size
        );

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&config.path)
            .with_context(|| format!("Couldn't create {:?}", config.path))?;

        let marker_offset = config.size.saturating_sub(SIZE_MARKER.len() as u64);
        file.seek(SeekFrom::Start(marker_offset))
            .with_context(|| format!("Seek to {marker_offset} in {:?}", config.path))?;
        file.write_all(&SIZE_MARKER)
            .with_context(|| format!("Pre-size {:?}", config.path))?;

        let block_size = usize::try_from(config.block_size)
            .with_context(|| format!("Block size {} exceeds address space", config.block_size))?;
        let mut block = Vec::new();
        block
            .try_reserve_exact(block_size)
            .with_context(|| format!("Allocate {block_size} byte block"))?;
        block.resize(block_size, 0);

        Ok(Self {
            read: ChurnCursor::new(config.step_size, config.size, Wrap::ToStart),
            write: ChurnCursor::new(
                config.step_size.saturating_mul(2),
                config.size,
                Wrap::ToStart,
            ),
            config,
            file,
            block,
            write_iteration: 0,
        })
    }

    pub fn read_position(&self) -> u64 {
        self.read.position()
    }

    pub fn write_position(&self) -> u64 {
        self.write.position()
    }

    pub fn write_iteration(&self) -> u64 {
        self.write_iteration
    }

    /// Writes one block at the write cursor, then reads one at the read cursor.
    pub fn step(&mut self) -> anyhow::Result<()> {
        // vary the content per pass so rewrites are never identical
        for (i, byte) in self.block.iter_mut().enumerate() {
            *byte = ((self.write_iteration as usize | i) & 0xff) as u8;
        }

        let wpos = self.write.position();
        self.file
            .seek(SeekFrom::Start(wpos))
            .with_context(|| format!("Seek to {wpos} in {:?}", self.config.path))?;
        self.file
            .write_all(&self.block)
            .with_context(|| format!("Write to {:?} at {wpos}", self.config.path))?;
        if self.write.advance() {
            debug!("writer reached EOF at {}", wpos);
            self.write_iteration += 1;
        }

        let rpos = self.read.position();
        self.file
            .seek(SeekFrom::Start(rpos))
            .with_context(|| format!("Seek to {rpos} in {:?}", self.config.path))?;
        let read = self
            .file
            .read(&mut self.block)
            .with_context(|| format!("Error reading from {:?} at {rpos}", self.config.path))?;

        if read == 0 {
            info!("reader reached EOF early (at {rpos})");
            self.read.reset();
        } else if self.read.advance() {
            debug!("reader reached EOF at {rpos}");
        }

        Ok(())
    }

    pub fn run(mut self) -> anyhow::Result<Infallible> {
        let sleep = Duration::from_millis(self.config.sleep_msec);
        loop {
            self.step()?;
            std::thread::sleep(sleep);
        }
    }
}
