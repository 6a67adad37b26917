//! Debug dump of outbound microphone audio
//!
//! Chunks are handed to a background writer thread so the session thread
//! never waits on disk I/O. The file holds raw 16 kHz mono 16-bit
//! little-endian PCM.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::ClientResult;
use crossbeam_channel::{unbounded, Sender};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

enum DumpCommand {
    Chunk(Vec<u8>),
    Flush,
}

/// Background raw PCM writer
pub struct AudioDumper {
    path: PathBuf,
    sender: Option<Sender<DumpCommand>>,
    worker: Option<JoinHandle<io::Result<u64>>>,
}

impl std::fmt::Debug for AudioDumper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDumper").field("path", &self.path).finish()
    }
}

impl AudioDumper {
    /// Create (truncate) the dump file and start the writer thread
    pub fn start(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let (sender, receiver) = unbounded::<DumpCommand>();

        let worker = thread::Builder::new()
            .name("inworld-audio-dump".to_string())
            .spawn(move || -> io::Result<u64> {
                let mut writer = BufWriter::new(file);
                let mut written = 0u64;
                for command in receiver.iter() {
                    match command {
                        DumpCommand::Chunk(chunk) => {
                            writer.write_all(&chunk)?;
                            written += chunk.len() as u64;
                        }
                        DumpCommand::Flush => writer.flush()?,
                    }
                }
                writer.flush()?;
                Ok(written)
            })?;

        info!(path = %path.display(), "Audio dump started");
        Ok(Self {
            path,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a chunk for writing
    pub fn write(&self, chunk: &[u8]) {
        if let Some(sender) = &self.sender {
            if sender.send(DumpCommand::Chunk(chunk.to_vec())).is_err() {
                debug!("Audio dump writer has stopped");
            }
        }
    }

    /// Ask the writer to flush buffered bytes to disk
    pub fn flush(&self) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(DumpCommand::Flush);
        }
    }

    /// Stop the writer and wait for it, returning the number of bytes written
    pub fn finish(mut self) -> ClientResult<u64> {
        Ok(self.shutdown()?)
    }

    fn shutdown(&mut self) -> io::Result<u64> {
        self.sender.take();
        match self.worker.take() {
            Some(worker) => match worker.join() {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::Other,
                    "audio dump writer panicked",
                )),
            },
            None => Ok(0),
        }
    }
}

impl Drop for AudioDumper {
    fn drop(&mut self) {
        match self.shutdown() {
            Ok(bytes) if bytes > 0 => {
                info!(path = %self.path.display(), bytes, "Audio dump closed");
            }
            Ok(_) => {}
            Err(e) => error!(path = %self.path.display(), error = %e, "Audio dump failed"),
        }
    }
}
