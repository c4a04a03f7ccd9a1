//! Mounted sector-addressable drives (component C). Geometry is derived
//! from the backing file's size against the known table in design §6;
//! a caller can always override the detected geometry explicitly.

use crate::error::GuestIoError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const MAX_DRIVES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub tracks: u16,
    pub sectors_per_track: u16,
    pub sector_size: u16,
}

impl Geometry {
    pub const fn new(tracks: u16, sectors_per_track: u16, sector_size: u16) -> Self {
        Geometry { tracks, sectors_per_track, sector_size }
    }

    fn total_bytes(&self) -> u64 {
        self.tracks as u64 * self.sectors_per_track as u64 * self.sector_size as u64
    }
}

/// Known formats, checked in order against the file's length.
const KNOWN_GEOMETRIES: &[Geometry] = &[
    Geometry::new(77, 26, 128),
    Geometry::new(1024, 16, 512),
    Geometry::new(1040, 16, 512),
];

pub fn detect_geometry(file_len: u64) -> Option<Geometry> {
    KNOWN_GEOMETRIES.iter().copied().find(|g| g.total_bytes() == file_len)
}

pub struct Drive {
    pub path: PathBuf,
    pub geometry: Geometry,
    file: File,
    read_only: bool,
    track: u16,
    sector: u16,
    dma_bank: usize,
    dma_addr: u16,
}

impl Drive {
    pub fn mount(path: impl AsRef<Path>, read_only: bool, geometry: Option<Geometry>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(!read_only).open(&path)?;
        let len = file.metadata()?.len();
        let geometry = geometry
            .or_else(|| detect_geometry(len))
            .unwrap_or(Geometry::new(77, 26, 128));
        Ok(Drive {
            path,
            geometry,
            file,
            read_only,
            track: 0,
            sector: 0,
            dma_bank: 0,
            dma_addr: 0,
        })
    }

    fn offset(&self) -> u64 {
        self.track as u64 * self.geometry.sectors_per_track as u64 * self.geometry.sector_size as u64
            + self.sector as u64 * self.geometry.sector_size as u64
    }

    pub fn set_track(&mut self, t: u16) {
        self.track = t;
    }

    pub fn set_sector(&mut self, s: u16) {
        self.sector = s;
    }

    pub fn set_dma(&mut self, bank: usize, addr: u16) {
        self.dma_bank = bank;
        self.dma_addr = addr;
    }

    pub fn dma_target(&self) -> (usize, u16) {
        (self.dma_bank, self.dma_addr)
    }

    pub fn sector_size(&self) -> usize {
        self.geometry.sector_size as usize
    }

    pub fn read_sector(&mut self) -> Result<Vec<u8>, GuestIoError> {
        let mut buf = vec![0u8; self.sector_size()];
        self.file.seek(SeekFrom::Start(self.offset())).map_err(|_| GuestIoError::IoShort)?;
        self.file.read_exact(&mut buf).map_err(|_| GuestIoError::IoShort)?;
        Ok(buf)
    }

    pub fn write_sector(&mut self, data: &[u8]) -> Result<(), GuestIoError> {
        if self.read_only || data.len() != self.sector_size() {
            return Err(GuestIoError::IoShort);
        }
        self.file.seek(SeekFrom::Start(self.offset())).map_err(|_| GuestIoError::IoShort)?;
        self.file.write_all(data).map_err(|_| GuestIoError::IoShort)?;
        Ok(())
    }

    /// CP/M-style logical-to-physical sector skew translation. MP/M II's
    /// standard table is identity for the formats this emulator targets;
    /// kept as a seam so a skewed table could be dropped in without
    /// touching XIOS.
    pub fn translate(&self, logical: u16) -> u16 {
        logical
    }
}

#[derive(Default)]
pub struct DiskTable {
    drives: [Option<Drive>; MAX_DRIVES],
    selected: Option<usize>,
}

impl DiskTable {
    pub fn new() -> Self {
        DiskTable { drives: Default::default(), selected: None }
    }

    pub fn mount(&mut self, drive: usize, path: impl AsRef<Path>, read_only: bool) -> std::io::Result<()> {
        self.drives[drive] = Some(Drive::mount(path, read_only, None)?);
        Ok(())
    }

    /// Whether a drive is mounted, regardless of selection — used by the
    /// HTTP front end to list available drives without disturbing the
    /// XIOS-facing `selected` state.
    pub fn is_mounted(&self, drive: usize) -> bool {
        drive < MAX_DRIVES && self.drives[drive].is_some()
    }

    pub fn unmount(&mut self, drive: usize) {
        self.drives[drive] = None;
        if self.selected == Some(drive) {
            self.selected = None;
        }
    }

    pub fn select(&mut self, drive: usize) -> Result<(), GuestIoError> {
        if drive >= MAX_DRIVES || self.drives[drive].is_none() {
            return Err(GuestIoError::NoSuchDrive);
        }
        self.selected = Some(drive);
        Ok(())
    }

    fn current_mut(&mut self) -> Result<&mut Drive, GuestIoError> {
        let idx = self.selected.ok_or(GuestIoError::NoSuchDrive)?;
        self.drives[idx].as_mut().ok_or(GuestIoError::NoSuchDrive)
    }

    pub fn set_track(&mut self, t: u16) -> Result<(), GuestIoError> {
        self.current_mut()?.set_track(t);
        Ok(())
    }

    pub fn set_sector(&mut self, s: u16) -> Result<(), GuestIoError> {
        self.current_mut()?.set_sector(s);
        Ok(())
    }

    pub fn set_dma(&mut self, bank: usize, addr: u16) -> Result<(), GuestIoError> {
        self.current_mut()?.set_dma(bank, addr);
        Ok(())
    }

    pub fn dma_target(&self) -> Result<(usize, u16), GuestIoError> {
        let idx = self.selected.ok_or(GuestIoError::NoSuchDrive)?;
        Ok(self.drives[idx].as_ref().ok_or(GuestIoError::NoSuchDrive)?.dma_target())
    }

    /// Sector size of the currently selected drive, if any — used by XIOS
    /// `WRITE` to know how many bytes to gather from the DMA target before
    /// handing them to `write_sector`.
    pub fn sector_size_hint(&self) -> Option<usize> {
        let idx = self.selected?;
        self.drives[idx].as_ref().map(|d| d.sector_size())
    }

    pub fn read_sector(&mut self) -> Result<Vec<u8>, GuestIoError> {
        self.current_mut()?.read_sector()
    }

    pub fn write_sector(&mut self, data: &[u8]) -> Result<(), GuestIoError> {
        self.current_mut()?.write_sector(data)
    }

    pub fn translate(&mut self, logical: u16) -> Result<u16, GuestIoError> {
        Ok(self.current_mut()?.translate(logical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn detects_standard_8_inch_floppy() {
        assert_eq!(detect_geometry(256_256), Some(Geometry::new(77, 26, 128)));
    }

    #[test]
    fn detects_hard_disk_formats() {
        assert_eq!(detect_geometry(8_388_608), Some(Geometry::new(1024, 16, 512)));
        assert_eq!(detect_geometry(8_519_680), Some(Geometry::new(1040, 16, 512)));
    }

    #[test]
    fn unknown_size_falls_back_to_none() {
        assert_eq!(detect_geometry(42), None);
    }

    #[test]
    fn round_trips_a_sector() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), vec![0u8; 256_256]).unwrap();
        let mut table = DiskTable::new();
        table.mount(0, file.path(), false).unwrap();
        table.select(0).unwrap();
        table.set_track(2).unwrap();
        table.set_sector(0).unwrap();
        let payload: Vec<u8> = (0..128).collect();
        table.write_sector(&payload).unwrap();
        table.set_track(2).unwrap();
        table.set_sector(0).unwrap();
        let back = table.read_sector().unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn selecting_unmounted_drive_fails() {
        let mut table = DiskTable::new();
        assert_eq!(table.select(5), Err(GuestIoError::NoSuchDrive));
    }
}
