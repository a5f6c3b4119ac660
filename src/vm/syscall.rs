//! Syscall parameter marshalling.
//!
//! A SYSCALL instruction names a cluster in the dataspace. The members of the
//! cluster are the syscall's parameters, addressed relative to the cluster
//! entry: field 1 is always the status result, the rest depend on the call.

use serde::Serialize;

use super::memory::{Memory, MemoryError};

pub const FILE_OPEN_READ: u16 = 0x00;
pub const SOUND_PLAY_FILE: u16 = 0x09;
pub const SOUND_PLAY_TONE: u16 = 0x0A;
pub const COMM_LS_WRITE: u16 = 0x15;
pub const COMM_LS_READ: u16 = 0x16;
pub const COMM_LS_CHECK_STATUS: u16 = 0x17;
pub const LIST_FILES: u16 = 0x2F;

/// Field holding the status code written back after every call.
pub const STATUS_FIELD: usize = 1;

/// Longest sound file name, including the terminating NUL.
pub const MAX_SOUND_FILENAME: usize = 20;

/// Name of a syscall id, for logging.
pub fn syscall_name(id: u16) -> &'static str {
    match id {
        0x00 => "NXTFileOpenRead",
        0x01 => "NXTFileOpenWrite",
        0x02 => "NXTFileOpenAppend",
        0x03 => "NXTFileRead",
        0x04 => "NXTFileWrite",
        0x05 => "NXTFileClose",
        0x06 => "NXTFileResolveHandle",
        0x07 => "NXTFileRename",
        0x08 => "NXTFileDelete",
        0x09 => "NXTSoundPlayFile",
        0x0A => "NXTSoundPlayTone",
        0x0B => "NXTSoundGetState",
        0x0C => "NXTSoundSetState",
        0x0D => "NXTDrawText",
        0x0E => "NXTDrawPoint",
        0x0F => "NXTDrawLine",
        0x10 => "NXTDrawCircle",
        0x11 => "NXTDrawRect",
        0x12 => "NXTDrawPicture",
        0x13 => "NXTSetScreenMode",
        0x14 => "NXTReadButton",
        0x15 => "NXTCommLSWrite",
        0x16 => "NXTCommLSRead",
        0x17 => "NXTCommLSCheckStatus",
        0x18 => "NXTRandomNumber",
        0x19 => "NXTGetStartTick",
        0x1A => "NXTMessageWrite",
        0x1B => "NXTMessageRead",
        0x1C => "NXTCommBTCheckStatus",
        0x1D => "NXTCommBTWrite",
        0x1E => "NXTCommBTRead",
        0x1F => "NXTKeepAlive",
        0x20 => "NXTIOMapRead",
        0x21 => "NXTIOMapWrite",
        0x22 => "NXTColorSensorRead",
        0x23 => "NXTBTPower",
        0x24 => "NXTBTConnection",
        0x25 => "NXTCommHSWrite",
        0x26 => "NXTCommHSRead",
        0x27 => "NXTCommHSCheckStatus",
        0x28 => "NXTReadSemData",
        0x29 => "NXTWriteSemData",
        0x2A => "NXTComputeCalibValue",
        0x2B => "NXTUpdateCalibCacheData",
        0x2C => "NXTDatalogWrite",
        0x2D => "NXTDatalogGetTimes",
        0x2E => "NXTSetSleepTimeout",
        0x2F => "NXTListFiles",
        _ => "Not_A_Valid_Syscall",
    }
}

/// Cluster-relative view of program memory for one syscall.
pub struct ParamCluster<'m> {
    memory: &'m mut Memory,
    base: usize,
}

impl<'m> ParamCluster<'m> {
    pub fn new(memory: &'m mut Memory, base: usize) -> Self {
        Self { memory, base }
    }

    /// Dataspace entry of the cluster itself.
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn scalar(&self, field: usize) -> Result<i32, MemoryError> {
        self.memory.scalar(self.base + field)
    }

    pub fn set_scalar(&mut self, field: usize, value: i32) -> Result<(), MemoryError> {
        self.memory.set_scalar(self.base + field, value)
    }

    pub fn set_status(&mut self, status: i32) -> Result<(), MemoryError> {
        self.set_scalar(STATUS_FIELD, status)
    }

    pub fn array_len(&self, field: usize) -> Result<usize, MemoryError> {
        self.memory.array_len(self.base + field)
    }

    pub fn set_array_len(&mut self, field: usize, len: usize) -> Result<(), MemoryError> {
        self.memory.set_array_len(self.base + field, len)
    }

    pub fn array_data(&self, field: usize) -> Result<&[u8], MemoryError> {
        self.memory.array_data(self.base + field)
    }

    pub fn array_data_mut(&mut self, field: usize) -> Result<&mut [u8], MemoryError> {
        self.memory.array_data_mut(self.base + field)
    }

    /// Byte array field as text, up to the first NUL.
    pub fn string(&self, field: usize) -> Result<String, MemoryError> {
        let data = self.array_data(field)?;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Ok(String::from_utf8_lossy(&data[..end]).into_owned())
    }
}

/// A syscall with its parameters read out of the cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum SyscallRequest {
    PlayFile {
        /// `None` when the name in memory is not acceptable.
        filename: Option<String>,
        looping: bool,
        volume: f32,
    },
    PlayTone {
        frequency: i32,
        duration: i32,
        looping: bool,
        volume: f32,
    },
    LowSpeedWrite {
        port: i32,
        buffer: Vec<u8>,
        bytes_expected: i32,
    },
    LowSpeedRead {
        port: i32,
        buffer_len: i32,
    },
    LowSpeedCheckStatus {
        port: i32,
    },
    Unsupported {
        id: u16,
    },
}

impl SyscallRequest {
    pub fn decode(id: u16, cluster: &ParamCluster<'_>) -> Result<Self, MemoryError> {
        let request = match id {
            SOUND_PLAY_FILE => SyscallRequest::PlayFile {
                filename: sanitize_sound_filename(cluster.array_data(2)?),
                looping: cluster.scalar(4)? != 0,
                volume: volume(cluster.scalar(5)?),
            },
            SOUND_PLAY_TONE => SyscallRequest::PlayTone {
                frequency: cluster.scalar(2)?,
                duration: cluster.scalar(3)?,
                looping: cluster.scalar(4)? != 0,
                volume: volume(cluster.scalar(5)?),
            },
            COMM_LS_WRITE => SyscallRequest::LowSpeedWrite {
                port: cluster.scalar(2)?,
                buffer: cluster.array_data(3)?.to_vec(),
                bytes_expected: cluster.scalar(5)?,
            },
            COMM_LS_READ => SyscallRequest::LowSpeedRead {
                port: cluster.scalar(2)?,
                buffer_len: cluster.scalar(5)?,
            },
            COMM_LS_CHECK_STATUS => SyscallRequest::LowSpeedCheckStatus {
                port: cluster.scalar(2)?,
            },
            _ => SyscallRequest::Unsupported { id },
        };
        Ok(request)
    }
}

/// Program volume runs 0..=4.
fn volume(raw: i32) -> f32 {
    raw as f32 * 0.25
}

/// Turn a NUL-terminated file name from program memory into a safe sound
/// file name.
///
/// The name must fit in [`MAX_SOUND_FILENAME`] bytes including the NUL.
/// Characters other than ASCII alphanumerics, space, `.`, `!`, `-` and `_` are
/// replaced by `_`, and the three characters before the NUL become `wav`.
pub fn sanitize_sound_filename(bytes: &[u8]) -> Option<String> {
    let len = bytes.len();
    if len > MAX_SOUND_FILENAME || len < 4 || bytes[len - 1] != 0 {
        return None;
    }

    let mut name: Vec<u8> = bytes[..len - 1]
        .iter()
        .map(|&c| {
            if c.is_ascii_alphanumeric() || matches!(c, b' ' | b'.' | b'!' | b'-' | b'_') {
                c
            } else {
                b'_'
            }
        })
        .collect();
    let ext = name.len() - 3;
    name[ext..].copy_from_slice(b"wav");
    String::from_utf8(name).ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::vm::asm::ImageBuilder;
    use crate::vm::types::SlotType;

    #[test]
    fn test_sanitize_keeps_plain_names() {
        assert_eq!(
            sanitize_sound_filename(b"Hello World.rso\0"),
            Some("Hello World.wav".to_string())
        );
    }

    #[test]
    fn test_sanitize_replaces_bad_characters() {
        assert_eq!(
            sanitize_sound_filename(b"../x/y.rso\0"),
            Some(".._x_y.wav".to_string())
        );
    }

    #[test]
    fn test_sanitize_rejects() {
        // No terminator
        assert_eq!(sanitize_sound_filename(b"abc.rso"), None);
        // Too long
        assert_eq!(sanitize_sound_filename(b"a_very_long_name_here.rso\0"), None);
        // Too short to carry an extension
        assert_eq!(sanitize_sound_filename(b"ab\0"), None);
        assert_eq!(sanitize_sound_filename(b""), None);
    }

    #[test]
    fn test_syscall_names() {
        assert_eq!(syscall_name(SOUND_PLAY_TONE), "NXTSoundPlayTone");
        assert_eq!(syscall_name(FILE_OPEN_READ), "NXTFileOpenRead");
        assert_eq!(syscall_name(LIST_FILES), "NXTListFiles");
        assert_eq!(syscall_name(0x30), "Not_A_Valid_Syscall");
    }

    #[test]
    fn test_decode_play_tone() {
        let mut b = ImageBuilder::new();
        let cluster = b.cluster(&[
            SlotType::SByte,
            SlotType::UWord,
            SlotType::UWord,
            SlotType::UByte,
            SlotType::UByte,
        ]);
        b.set_default(cluster + 2, 440);
        b.set_default(cluster + 3, 500);
        b.set_default(cluster + 4, 1);
        b.set_default(cluster + 5, 2);
        let mut memory = Memory::new(Arc::new(b.build())).unwrap();

        let params = ParamCluster::new(&mut memory, cluster as usize);
        let request = SyscallRequest::decode(SOUND_PLAY_TONE, &params).unwrap();
        assert_eq!(
            request,
            SyscallRequest::PlayTone {
                frequency: 440,
                duration: 500,
                looping: true,
                volume: 0.5
            }
        );
    }

    #[test]
    fn test_decode_play_file_reads_string() {
        let mut b = ImageBuilder::new();
        let cluster = b.cluster(&[
            SlotType::SByte,
            SlotType::Array,
            SlotType::UByte,
            SlotType::UByte,
        ]);
        b.set_array_default(cluster + 2, b"tone.rso\0");
        b.set_default(cluster + 5, 4);
        let mut memory = Memory::new(Arc::new(b.build())).unwrap();

        let params = ParamCluster::new(&mut memory, cluster as usize);
        assert_eq!(params.string(2).unwrap(), "tone.rso");
        let request = SyscallRequest::decode(SOUND_PLAY_FILE, &params).unwrap();
        assert_eq!(
            request,
            SyscallRequest::PlayFile {
                filename: Some("tone.wav".to_string()),
                looping: false,
                volume: 1.0
            }
        );
    }

    #[test]
    fn test_unknown_syscall_is_unsupported() {
        let mut b = ImageBuilder::new();
        let cluster = b.cluster(&[SlotType::SByte]);
        let mut memory = Memory::new(Arc::new(b.build())).unwrap();
        let mut params = ParamCluster::new(&mut memory, cluster as usize);

        let request = SyscallRequest::decode(0x18, &params).unwrap();
        assert_eq!(request, SyscallRequest::Unsupported { id: 0x18 });
        params.set_status(-1).unwrap();
        assert_eq!(params.scalar(STATUS_FIELD).unwrap(), -1);
    }
}
