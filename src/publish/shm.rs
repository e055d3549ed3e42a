//! Shared-memory frame layout and write discipline (§4.G.3, §4.G.4, §5, §9).
//!
//! ```text
//! offset 0  u32  status       (init sentinel: 99999999)
//! offset 4  u64  timestamp_ns
//! offset 12 u32  cfgType      (1 = ServiceCfg)
//! offset 16 [32] md5 hex of payload (ASCII)
//! offset 48 u32  payload_len
//! offset 52 [N]  payload (protobuf Config)
//! ```

use std::fs::OpenOptions;
use std::io::Write;

use fs2::FileExt;
use md5::{Digest, Md5};
use memmap2::MmapMut;

use crate::error::ShmError;

pub const STATUS_INIT_SENTINEL: u32 = 99_999_999;
pub const CFG_TYPE_SERVICE_CFG: u32 = 1;
pub const HEADER_LEN: usize = 4 + 8 + 4 + 32 + 4;

pub fn payload_md5_hex(payload: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Build the fixed-layout frame bytes for `payload` (§4.G.3).
pub fn build_frame(payload: &[u8], timestamp_ns: u64) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&STATUS_INIT_SENTINEL.to_be_bytes());
    frame.extend_from_slice(&timestamp_ns.to_be_bytes());
    frame.extend_from_slice(&CFG_TYPE_SERVICE_CFG.to_be_bytes());
    let md5_hex = payload_md5_hex(payload);
    debug_assert_eq!(md5_hex.len(), 32);
    frame.extend_from_slice(md5_hex.as_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn frame_payload_md5(frame: &[u8]) -> Option<&[u8]> {
    frame.get(16..48)
}

/// Writer for the named shared-memory segment. Holds no state across
/// calls beyond the paths; the OS file-lock is acquired and released once
/// per `publish` (§5: "never hold ... File-lock for shared memory is
/// acquired only inside `publish`").
pub struct ShmWriter {
    pub lock_path: String,
    pub segment_path: String,
    pub segment_size: usize,
}

impl ShmWriter {
    /// Acquire the file-lock, create-or-open the segment, write the whole
    /// frame at offset 0, release the lock. Short writes are errors (§4.G.4).
    pub fn write_frame(&self, frame: &[u8]) -> Result<(), ShmError> {
        if frame.len() > self.segment_size {
            return Err(ShmError::Open(format!(
                "frame of {} bytes exceeds segment size {}",
                frame.len(),
                self.segment_size
            )));
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(ShmError::Io)?;
        lock_file
            .lock_exclusive()
            .map_err(|_| ShmError::Lock(self.lock_path.clone()))?;

        let result = (|| -> Result<(), ShmError> {
            let exists = std::path::Path::new(&self.segment_path).exists();
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&self.segment_path)
                .map_err(ShmError::Io)?;
            if !exists {
                file.set_len(self.segment_size as u64).map_err(ShmError::Io)?;
            }
            let mut mmap = unsafe { MmapMut::map_mut(&file) }
                .map_err(|e| ShmError::Open(format!("{}: {e}", self.segment_path)))?;

            let mut cursor = &mut mmap[..frame.len()];
            let wrote = cursor.write(frame).map_err(ShmError::Io)?;
            if wrote != frame.len() {
                return Err(ShmError::ShortWrite {
                    wrote,
                    want: frame.len(),
                });
            }
            mmap.flush().map_err(ShmError::Io)?;
            Ok(())
        })();

        lock_file.unlock().ok();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_matches_spec() {
        let payload = vec![7u8; 128];
        let frame = build_frame(&payload, 42);
        assert_eq!(frame.len(), HEADER_LEN + 128);

        let status = u32::from_be_bytes(frame[0..4].try_into().unwrap());
        assert_eq!(status, STATUS_INIT_SENTINEL);

        let md5_region = frame_payload_md5(&frame).unwrap();
        assert_eq!(md5_region, payload_md5_hex(&payload).as_bytes());

        let payload_len = u32::from_be_bytes(frame[48..52].try_into().unwrap());
        assert_eq!(payload_len, 128);
    }

    #[test]
    fn write_frame_round_trips_through_tmp_files() {
        let dir = std::env::temp_dir().join(format!("shm-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let writer = ShmWriter {
            lock_path: dir.join("lock").to_string_lossy().to_string(),
            segment_path: dir.join("segment").to_string_lossy().to_string(),
            segment_size: 4096,
        };
        let frame = build_frame(b"hello", 1);
        writer.write_frame(&frame).unwrap();
        let written = std::fs::read(&writer.segment_path).unwrap();
        assert_eq!(&written[..frame.len()], frame.as_slice());
        std::fs::remove_dir_all(&dir).ok();
    }
}
