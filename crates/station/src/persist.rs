//! File-backed stand-ins for the flash store and the RTC memory.
//!
//! The store image only reaches disk on `commit`, like an emulated EEPROM.
//! The wake memory is rewritten on every slot write; deleting its file is a
//! power loss.

use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

use yaha_core::hal::{NonVolatileStore, WakeMemory, WakeSlot};
use yaha_core::StoreError;

const ERASED: u8 = 0xFF;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct FileStore {
    path: PathBuf,
    image: Vec<u8>,
}

impl FileStore {
    /// Load the image at `path`, or start erased if there is none.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let image = if path.exists() {
            let mut bytes =
                fs::read(&path).with_context(|| format!("failed to read store {}", path.display()))?;
            if bytes.len() != capacity {
                tracing::warn!(
                    path = %path.display(),
                    found = bytes.len(),
                    capacity,
                    "store image size differs, resizing"
                );
                bytes.resize(capacity, ERASED);
            }
            bytes
        } else {
            tracing::info!(path = %path.display(), capacity, "no store image, starting erased");
            vec![ERASED; capacity]
        };
        Ok(Self { path, image })
    }

    fn range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>, StoreError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.image.len() => Ok(offset..end),
            _ => Err(StoreError::OutOfBounds {
                offset,
                len,
                capacity: self.image.len(),
            }),
        }
    }
}

impl NonVolatileStore for FileStore {
    fn capacity(&self) -> usize {
        self.image.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        let r = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.image[r]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StoreError> {
        let r = self.range(offset, data.len())?;
        self.image[r].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        fs::write(&self.path, &self.image)
            .map_err(|e| StoreError::Backend(format!("{}: {e}", self.path.display())))?;
        tracing::debug!(path = %self.path.display(), "store committed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wake memory
// ---------------------------------------------------------------------------

pub struct FileWakeMemory {
    path: PathBuf,
    slots: [u32; WakeSlot::COUNT],
}

impl FileWakeMemory {
    /// A missing or truncated file reads as zeroed slots.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut slots = [0u32; WakeSlot::COUNT];
        match fs::read(&path) {
            Ok(bytes) if bytes.len() == WakeSlot::COUNT * 4 => {
                for (slot, chunk) in slots.iter_mut().zip(bytes.chunks_exact(4)) {
                    *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
            }
            Ok(bytes) => {
                tracing::warn!(path = %path.display(), len = bytes.len(), "wake memory corrupt");
            }
            Err(_) => tracing::info!(path = %path.display(), "no wake memory, power-on start"),
        }
        Self { path, slots }
    }

    fn save(&self) {
        let bytes: Vec<u8> = self.slots.iter().flat_map(|s| s.to_le_bytes()).collect();
        if let Err(e) = fs::write(&self.path, bytes) {
            tracing::warn!(path = %self.path.display(), "failed to save wake memory: {e}");
        }
    }
}

impl WakeMemory for FileWakeMemory {
    fn read(&self, slot: WakeSlot) -> u32 {
        self.slots[slot.index()]
    }

    fn write(&mut self, slot: WakeSlot, value: u32) {
        self.slots[slot.index()] = value;
        self.save();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
