//! File-backed flash partition
//!
//! Stores a flash image in a regular file so host tools can operate on a
//! partition dump. Geometry comes from a partition descriptor stored next
//! to the image (`<image>.part`), standing in for a device partition table.
//!
//! ## Descriptor Format
//! ```text
//! ┌──────────────┬─────────────────────────────────────────────┐
//! │ Version (2)  │ Geometry (bincode: base, size, count, align) │
//! └──────────────┴─────────────────────────────────────────────┘
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{program, FlashError, FlashPartition, Geometry, ERASED_BYTE};

/// Current descriptor format version
const DESCRIPTOR_VERSION: u16 = 1;

/// Partition table entry describing an image file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    pub version: u16,
    pub geometry: Geometry,
}

impl PartitionDescriptor {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            geometry,
        }
    }

    /// Path of the descriptor belonging to `image`
    pub fn path_for(image: &Path) -> PathBuf {
        let mut name = image.as_os_str().to_owned();
        name.push(".part");
        PathBuf::from(name)
    }

    /// Load and validate a descriptor file
    pub fn load(path: &Path) -> Result<Self, FlashError> {
        let bytes = fs::read(path)?;
        let descriptor: PartitionDescriptor = bincode::deserialize(&bytes)
            .map_err(|e| FlashError::Device(format!("bad partition descriptor: {}", e)))?;

        if descriptor.version != DESCRIPTOR_VERSION {
            return Err(FlashError::Device(format!(
                "unsupported partition descriptor version: {}",
                descriptor.version
            )));
        }
        if !descriptor.geometry.is_valid() {
            return Err(FlashError::Device(format!(
                "invalid geometry in partition descriptor: {:?}",
                descriptor.geometry
            )));
        }

        Ok(descriptor)
    }

    /// Persist this descriptor
    pub fn save(&self, path: &Path) -> Result<(), FlashError> {
        let bytes = bincode::serialize(self)
            .map_err(|e| FlashError::Device(format!("encode partition descriptor: {}", e)))?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }
}

/// Flash partition backed by an image file
pub struct FileFlash {
    path: PathBuf,
    file: File,
    geometry: Geometry,
}

impl FileFlash {
    /// Create a new, fully erased image and its descriptor
    ///
    /// Truncates any existing image at `path`.
    pub fn create(path: &Path, geometry: Geometry) -> Result<Self, FlashError> {
        if !geometry.is_valid() {
            return Err(FlashError::Device(format!(
                "invalid flash geometry: {:?}",
                geometry
            )));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let erased = vec![ERASED_BYTE; geometry.sector_size as usize];
        for _ in 0..geometry.sector_count {
            file.write_all(&erased)?;
        }
        file.sync_all()?;

        PartitionDescriptor::new(geometry).save(&PartitionDescriptor::path_for(path))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            geometry,
        })
    }

    /// Open an existing image using its descriptor
    pub fn open(path: &Path) -> Result<Self, FlashError> {
        let descriptor = PartitionDescriptor::load(&PartitionDescriptor::path_for(path))?;
        let geometry = descriptor.geometry;

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len != geometry.partition_size() {
            return Err(FlashError::Device(format!(
                "image size {} does not match partition size {}",
                len,
                geometry.partition_size()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            geometry,
        })
    }

    /// Path of the image file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FlashPartition for FileFlash {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.geometry.check_range(address, buf.len())?;
        self.file.seek(SeekFrom::Start(address as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.geometry.check_write(address, data.len())?;

        // Read-modify-write so the bit-clearing contract holds for images too
        let mut current = vec![0u8; data.len()];
        self.read(address, &mut current)?;
        program(&mut current, data, address)?;

        self.file.seek(SeekFrom::Start(address as u64))?;
        self.file.write_all(&current)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn erase(&mut self, sector: u32) -> Result<(), FlashError> {
        if sector >= self.geometry.sector_count {
            return Err(FlashError::InvalidSector(sector));
        }

        let erased = vec![ERASED_BYTE; self.geometry.sector_size as usize];
        self.file
            .seek(SeekFrom::Start(self.geometry.sector_address(sector) as u64))?;
        self.file.write_all(&erased)?;
        self.file.sync_data()?;
        Ok(())
    }
}
