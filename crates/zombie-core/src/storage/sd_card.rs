//! Record log and configuration blobs on a FAT-formatted SD card

use alloc::vec;
use alloc::vec::Vec;

use embedded_sdmmc::{Mode, SdCard, SdCardError, TimeSource, VolumeIdx, VolumeManager};
use log::{debug, error};

use super::{RECORD_LOG_FILE, RecordStorage, StorageError};

type SdError = embedded_sdmmc::Error<SdCardError>;

/// Maps an SD card error into a [`StorageError`], logging the driver error.
fn storage_error(operation: &'static str, e: SdError) -> StorageError {
    error!("SD card {} failed: {:?}", operation, e);
    match e {
        embedded_sdmmc::Error::DeviceError(_) => StorageError::Unavailable {
            details: "SD card did not respond",
        },
        _ => StorageError::Io {
            operation,
            details: "FAT file system error",
        },
    }
}

/// SD card operations are blocking; the node does nothing else while it
/// talks to the card.
pub struct SdCardStorage<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
    log_file: &'static str,
}

impl<S, D, T> SdCardStorage<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    /// Create a new SD card storage manager using the default log file
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        Self::with_log_file(sd_card, ts, RECORD_LOG_FILE)
    }

    pub fn with_log_file(sd_card: SdCard<S, D>, ts: T, log_file: &'static str) -> Self {
        let volume_mgr = VolumeManager::new(sd_card, ts);

        Self {
            volume_mgr,
            log_file,
        }
    }

    /// Reads a whole file from the root directory. A missing file reads as
    /// empty.
    pub fn read_file(&self, file_name: &str) -> Result<Vec<u8>, StorageError> {
        self.try_read_file(file_name)
            .or_else(|e| match e {
                embedded_sdmmc::Error::NotFound => {
                    debug!("{} not found on SD card", file_name);
                    Ok(Vec::new())
                }
                e => Err(e),
            })
            .map_err(|e| storage_error("read_file", e))
    }

    fn try_read_file(&self, file_name: &str) -> Result<Vec<u8>, SdError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(file_name, Mode::ReadOnly)?;

        let mut contents = vec![0u8; file.length() as usize];
        let mut filled = 0;
        while filled < contents.len() {
            let bytes_read = file.read(&mut contents[filled..])?;
            if bytes_read == 0 {
                break; // EOF
            }
            filled += bytes_read;
        }
        contents.truncate(filled);

        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(contents)
    }

    fn try_append(&self, bytes: &[u8]) -> Result<(), SdError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(self.log_file, Mode::ReadWriteCreateOrAppend)?;

        file.write(bytes)?;

        // Resources are closed on drop as well; closing explicitly surfaces
        // errors from flushing the FAT.
        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(())
    }

    fn try_read_at(&self, offset: u32, buf: &mut [u8]) -> Result<usize, SdError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(self.log_file, Mode::ReadOnly)?;

        let mut filled = 0;
        if offset < file.length() {
            file.seek_from_start(offset)?;
            while filled < buf.len() {
                let bytes_read = file.read(&mut buf[filled..])?;
                if bytes_read == 0 {
                    break; // EOF
                }
                filled += bytes_read;
            }
        }

        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(filled)
    }

    fn try_len(&self) -> Result<u32, SdError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(self.log_file, Mode::ReadOnly)?;

        let length = file.length();

        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(length)
    }

    fn try_clear(&self) -> Result<(), SdError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        root_dir.delete_file_in_dir(self.log_file)?;

        root_dir.close()?;
        volume0.close()?;

        Ok(())
    }
}

impl<S, D, T> RecordStorage for SdCardStorage<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.try_append(bytes)
            .map_err(|e| storage_error("append", e))
    }

    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.try_read_at(offset, buf) {
            Ok(count) => Ok(count),
            Err(embedded_sdmmc::Error::NotFound) => Ok(0),
            Err(e) => Err(storage_error("read", e)),
        }
    }

    fn len(&mut self) -> Result<u32, StorageError> {
        match self.try_len() {
            Ok(length) => Ok(length),
            Err(embedded_sdmmc::Error::NotFound) => Ok(0),
            Err(e) => Err(storage_error("len", e)),
        }
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        match self.try_clear() {
            Ok(()) | Err(embedded_sdmmc::Error::NotFound) => {
                debug!("Cleared {}", self.log_file);
                Ok(())
            }
            Err(e) => Err(storage_error("clear", e)),
        }
    }
}
