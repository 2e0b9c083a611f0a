//! FIFO of buffered commands.
//!
//! Block payloads stay in memory up to a byte ceiling. Past it, payload bytes
//! are appended to a scratch file and read back when their command is popped;
//! the entry list itself always stays in memory, so ordering never depends on
//! where the bytes live.

use std::{
    collections::VecDeque,
    io::{self, SeekFrom},
    path::PathBuf,
};

use bytes::Bytes;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{error, warn};

use crate::{TimeshiftError, clock::Timestamp, es::Block};

use super::{
    EsId,
    command::{Command, CommandKind},
    scratch,
};

#[derive(Debug)]
enum Entry {
    Resident(Command<'static>),
    Spilled(SpilledSend),
}

/// A `Send` command whose block bytes live in the scratch file.
#[derive(Debug)]
struct SpilledSend {
    date: Timestamp,
    es: EsId,
    /// Block with its data detached.
    block: Block,
    offset: u64,
    len: usize,
}

#[derive(Debug)]
struct SpillFile {
    // Keeps the path alive; the file is removed on drop.
    _file: NamedTempFile,
    io: tokio::fs::File,
    end: u64,
}

impl SpillFile {
    fn open(dir: &std::path::Path) -> io::Result<Self> {
        let file = scratch::open_scratch_file(dir)?;
        let io = tokio::fs::File::from_std(file.as_file().try_clone()?);
        Ok(Self {
            _file: file,
            io,
            end: 0,
        })
    }

    async fn append(&mut self, data: &[u8]) -> io::Result<u64> {
        let offset = self.end;
        self.io.seek(SeekFrom::Start(offset)).await?;
        self.io.write_all(data).await?;
        self.io.flush().await?;
        self.end += data.len() as u64;
        Ok(offset)
    }

    async fn read(&mut self, offset: u64, len: usize) -> io::Result<Bytes> {
        self.io.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0; len];
        self.io.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn truncate(&mut self) -> io::Result<()> {
        self.io.set_len(0).await?;
        self.end = 0;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct CommandQueue {
    entries: VecDeque<Entry>,
    resident_bytes: u64,
    max_resident_bytes: u64,
    scratch_dir: PathBuf,
    spill: Option<SpillFile>,
    spilled_entries: usize,
    spilled_blocks: u64,
}

impl CommandQueue {
    pub fn new(max_resident_bytes: u64, scratch_dir: PathBuf) -> Self {
        Self {
            entries: VecDeque::new(),
            resident_bytes: 0,
            max_resident_bytes,
            scratch_dir,
            spill: None,
            spilled_entries: 0,
            spilled_blocks: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of blocks written to the scratch file so far.
    pub fn spilled_blocks(&self) -> u64 {
        self.spilled_blocks
    }

    /// Makes room for one more command without touching the content.
    pub fn reserve(&mut self) -> Result<(), TimeshiftError> {
        self.entries
            .try_reserve(1)
            .map_err(|err| TimeshiftError::Allocation(format!("command queue: {err}")))
    }

    pub async fn push(&mut self, command: Command<'static>) -> Result<(), TimeshiftError> {
        self.reserve()?;
        let Command { date, kind } = command;
        let entry = match kind {
            CommandKind::Send { es, block }
                if self.resident_bytes + block.len() as u64 > self.max_resident_bytes =>
            {
                match self.spill_block(&block).await {
                    Ok(offset) => Entry::Spilled(SpilledSend {
                        date,
                        es,
                        len: block.len(),
                        offset,
                        block: Block {
                            data: Bytes::new(),
                            ..block
                        },
                    }),
                    Err(err) => {
                        warn!(target = "timeshift", error = %err, "spill failed, keeping block in memory");
                        self.resident_bytes += block.len() as u64;
                        Entry::Resident(Command::send(date, es, block))
                    }
                }
            }
            kind => {
                if let CommandKind::Send { block, .. } = &kind {
                    self.resident_bytes += block.len() as u64;
                }
                Entry::Resident(Command { date, kind })
            }
        };
        self.entries.push_back(entry);
        Ok(())
    }

    /// Removes the oldest command. Blocks that cannot be read back from the
    /// scratch file are dropped.
    pub async fn pop(&mut self) -> Option<Command<'static>> {
        loop {
            let entry = self.entries.pop_front()?;
            match entry {
                Entry::Resident(command) => {
                    if let CommandKind::Send { block, .. } = &command.kind {
                        self.resident_bytes -= block.len() as u64;
                    }
                    return Some(command);
                }
                Entry::Spilled(spilled) => {
                    self.spilled_entries -= 1;
                    let data = match self.spill.as_mut() {
                        Some(spill) => spill.read(spilled.offset, spilled.len).await,
                        None => Err(io::Error::new(io::ErrorKind::NotFound, "no scratch file")),
                    };
                    self.truncate_idle_spill().await;
                    match data {
                        Ok(data) => {
                            let block = Block {
                                data,
                                ..spilled.block
                            };
                            return Some(Command::send(spilled.date, spilled.es, block));
                        }
                        Err(err) => {
                            error!(target = "timeshift", es = %spilled.es, error = %err, "lost spilled block");
                        }
                    }
                }
            }
        }
    }

    /// Releases every pending command without executing it.
    pub async fn drain(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.resident_bytes = 0;
        self.spilled_entries = 0;
        self.truncate_idle_spill().await;
        count
    }

    async fn spill_block(&mut self, block: &Block) -> io::Result<u64> {
        if self.spill.is_none() {
            self.spill = Some(SpillFile::open(&self.scratch_dir)?);
        }
        let spill = self
            .spill
            .as_mut()
            .ok_or_else(|| io::Error::other("scratch file unavailable"))?;
        let offset = spill.append(&block.data).await?;
        self.spilled_entries += 1;
        self.spilled_blocks += 1;
        Ok(offset)
    }

    async fn truncate_idle_spill(&mut self) {
        if self.spilled_entries > 0 {
            return;
        }
        if let Some(spill) = self.spill.as_mut().filter(|spill| spill.end > 0) {
            if let Err(err) = spill.truncate().await {
                warn!(target = "timeshift", error = %err, "cannot truncate scratch file");
            }
        }
    }
}
