//! PCM input stream.
//!
//! Raw interleaved signed little-endian PCM, two samples per stereo frame,
//! left first. The descriptor runs non-blocking so the producer can tell
//! "no data right now" (underrun) apart from "end of stream": a would-block
//! read with nothing buffered is an underrun, a zero-byte read is EOF.
//!
//! Files given with `--input` open read+write so that a FIFO keeps a writer
//! and never reports EOF just because the far side paused.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use spdif::SampleDepth;

/// Input sample encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    S16le,
    /// Signed 24-bit little-endian (packed, 3 bytes).
    S24le,
}

impl SampleFormat {
    /// Bytes per single-channel sample.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16le => 2,
            SampleFormat::S24le => 3,
        }
    }

    /// Bytes per stereo frame.
    pub const fn frame_bytes(self) -> usize {
        self.bytes_per_sample() * 2
    }

    /// The subframe depth this format encodes at.
    pub const fn depth(self) -> SampleDepth {
        match self {
            SampleFormat::S16le => SampleDepth::Bits16,
            SampleFormat::S24le => SampleDepth::Bits24,
        }
    }

    /// Decode one sample from its little-endian bytes.
    pub fn decode(self, bytes: &[u8]) -> i32 {
        match self {
            SampleFormat::S16le => i32::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            SampleFormat::S24le => {
                let raw =
                    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
                // Sign-extend from 24 bits.
                ((raw << 8) as i32) >> 8
            }
        }
    }
}

/// One attempt to read a stereo frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete frame: (left, right).
    Frame(i32, i32),
    /// No data available right now; the stream is still open.
    WouldBlock,
    /// The stream ended (or failed; failures are treated as end of stream).
    Eof,
}

/// The non-blocking PCM source.
pub struct Input {
    file: File,
    format: SampleFormat,
    /// Partial frame carried across short reads.
    pending: [u8; 6],
    pending_len: usize,
}

impl Input {
    /// Open `path`, or stdin when `None`, in non-blocking mode.
    pub fn open(path: Option<&Path>, format: SampleFormat) -> io::Result<Self> {
        let file = match path {
            Some(path) => OpenOptions::new().read(true).write(true).open(path)?,
            None => {
                // Duplicate stdin so dropping the Input never closes fd 0.
                // SAFETY: dup either fails or returns a fresh descriptor we
                // exclusively own.
                let fd = unsafe { libc::dup(libc::STDIN_FILENO) };
                if fd < 0 {
                    return Err(io::Error::last_os_error());
                }
                // SAFETY: fd is a valid descriptor owned by no one else.
                unsafe { File::from_raw_fd(fd) }
            }
        };

        set_nonblocking(file.as_raw_fd())?;

        Ok(Self {
            file,
            format,
            pending: [0; 6],
            pending_len: 0,
        })
    }

    /// Try to read one stereo frame.
    ///
    /// Short reads keep their bytes buffered, so a frame split across pipe
    /// writes is reassembled rather than dropped.
    pub fn read_frame(&mut self) -> ReadOutcome {
        let needed = self.format.frame_bytes();

        while self.pending_len < needed {
            match self.file.read(&mut self.pending[self.pending_len..needed]) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(read) => self.pending_len += read,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return ReadOutcome::WouldBlock;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    tracing::warn!(%error, "read failed, treating as end of stream");
                    return ReadOutcome::Eof;
                }
            }
        }

        self.pending_len = 0;
        let per_sample = self.format.bytes_per_sample();
        let left = self.format.decode(&self.pending[..per_sample]);
        let right = self.format.decode(&self.pending[per_sample..needed]);
        ReadOutcome::Frame(left, right)
    }

    /// Block until the descriptor is readable or `timeout` passes.
    ///
    /// Returns `true` when readable. The timeout keeps the underrun wait
    /// responsive to the shutdown flag; callers loop around it.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        let mut descriptor = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: descriptor points at a valid pollfd for the duration of
        // the call.
        let ready = unsafe { libc::poll(&mut descriptor, 1, timeout_ms) };
        ready > 0 && descriptor.revents & (libc::POLLIN | libc::POLLHUP) != 0
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; F_GETFL/F_SETFL do not touch
    // memory.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    #[test]
    fn s16le_decodes_signed_extremes() {
        assert_eq!(SampleFormat::S16le.decode(&[0xFF, 0x7F]), 32_767);
        assert_eq!(SampleFormat::S16le.decode(&[0x00, 0x80]), -32_768);
        assert_eq!(SampleFormat::S16le.decode(&[0xFF, 0xFF]), -1);
    }

    #[test]
    fn s24le_sign_extends() {
        assert_eq!(SampleFormat::S24le.decode(&[0x56, 0x34, 0x12]), 0x12_3456);
        assert_eq!(SampleFormat::S24le.decode(&[0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(SampleFormat::S24le.decode(&[0x00, 0x00, 0x80]), -8_388_608);
    }

    #[test]
    fn frames_read_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x01, 0x00, 0xFF, 0xFF, 0x02, 0x00]).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut input = Input::open(Some(file.path()), SampleFormat::S16le).unwrap();
        assert_eq!(input.read_frame(), ReadOutcome::Frame(1, -1));
        // A trailing partial frame is not a frame; the file is exhausted.
        assert_eq!(input.read_frame(), ReadOutcome::Eof);
    }

    #[test]
    fn empty_regular_file_is_eof() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut input = Input::open(Some(file.path()), SampleFormat::S16le).unwrap();
        assert_eq!(input.read_frame(), ReadOutcome::Eof);
    }

    #[test]
    fn drained_fifo_reports_would_block_not_eof() {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcm.fifo");
        let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
        // SAFETY: c_path is a valid NUL-terminated path in a directory we own.
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

        // Opening read+write gives the FIFO a permanent writer, so a paused
        // producer reads as would-block rather than end of stream.
        let mut input = Input::open(Some(&path), SampleFormat::S16le).unwrap();
        assert_eq!(input.read_frame(), ReadOutcome::WouldBlock);

        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(&[0x01, 0x00, 0x02, 0x00]).unwrap();
        drop(writer);

        assert!(input.wait_readable(Duration::from_millis(500)));
        assert_eq!(input.read_frame(), ReadOutcome::Frame(1, 2));
        // Writer gone, FIFO drained: still just an underrun.
        assert_eq!(input.read_frame(), ReadOutcome::WouldBlock);
    }
}
