//! Boot and system-image assembly (component F): cold boot from a disk
//! image, or direct loading of a native system image (SYSDAT plus
//! relocatable segment files) with bitmap/heuristic relocation.

use crate::cpu::Cpu;
use crate::disk::DiskTable;
use crate::error::{GuestIoError, ImageFormatError};
use crate::memory::segment::Segment;
use crate::memory::sysdat::{SysDat, SYSDAT_SIZE};
use crate::xios::Xios;
use tracing::info;

/// Stub trampolines the loader writes so an unpatched XIOS vector slot
/// traps into the port ABI instead of jumping to nothing. One 5-byte
/// `LD A,n / OUT (0xE0),A / RET` sequence per documented dispatch offset.
const TRAMPOLINE_BASE: u16 = 0xFD00;
const TRAMPOLINE_STRIDE: u16 = 5;

/// Every documented dispatch offset, BOOT (0x00) through IDLE (0x48), at
/// the historical 3-byte BIOS vector spacing.
fn known_offsets() -> impl Iterator<Item = u8> {
    (0..=0x48u8).step_by(3)
}

/// Read sector 0 of the boot drive into bank 0 at `0x0000` and hand
/// control to it. The image itself owns further boot progression; this
/// loader does nothing beyond placing the first sector and pointing the
/// CPU at it.
pub fn cold_boot(cpu: &mut Cpu, disks: &mut DiskTable, boot_drive: usize) -> Result<(), GuestIoError> {
    disks.select(boot_drive)?;
    disks.set_track(0)?;
    disks.set_sector(0)?;
    let sector = disks.read_sector()?;
    cpu.memory.bulk_load(0, 0x0000, &sector);
    cpu.regs.pc = 0x0000;
    cpu.regs.sp = 0x0100;
    info!(boot_drive, "cold boot: loaded sector 0");
    Ok(())
}

/// Placed segment, ready for the loader to relocate and drop into place.
pub struct SegmentFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Parse SYSDAT, relocate each supplied segment to its declared base, lay
/// them into bank 0, copy SYSDAT back to `mem_top`, run `SYSTEMINIT`, and
/// set `PC`/`SP`.
///
/// `segments` must be supplied in the historical SYSDAT order: resident
/// BDOS, XDOS, optional RSPs, banked XIOS, banked BDOS, banked XDOS, TMP
/// — each is placed at the base given by its matching `SysDat` segment
/// descriptor slot.
pub fn direct_load(
    cpu: &mut Cpu,
    xios: &mut Xios,
    image: &[u8],
    segments: &[SegmentFile],
) -> Result<(), ImageFormatError> {
    let sysdat = SysDat::parse(image)?;

    for (seg_file, descriptor) in segments.iter().zip(sysdat.segments.iter()) {
        let parsed = Segment::parse(&seg_file.name, &seg_file.bytes)?;
        let (code, report) = parsed.relocate(descriptor.base);
        if report.used_heuristic {
            info!(
                segment = seg_file.name.as_str(),
                patched = report.patched_count,
                "segment relocated via heuristic scan (no reliable bitmap)"
            );
        }
        let base_addr = (descriptor.base as u16) << 8;
        cpu.memory.bulk_load(descriptor.bank as usize, base_addr, &code);
    }

    let mem_top_addr = sysdat.mem_top_addr();
    cpu.memory.bulk_load(0, mem_top_addr, &sysdat.raw);

    repair_xios_stubs(cpu, sysdat.bnkxios_base_addr());

    xios.set_bnkxios_base(sysdat.bnkxios_base_addr());
    let systeminit_offset = crate::xios::offset::SYSTEMINIT;
    xios.invoke(cpu, systeminit_offset);

    cpu.regs.pc = sysdat.xdos_base_addr();
    cpu.regs.sp = mem_top_addr;

    info!(
        pc = format!("{:#06x}", cpu.regs.pc),
        sp = format!("{:#06x}", cpu.regs.sp),
        "direct system image loaded"
    );
    Ok(())
}

/// Split a direct-load image's tail into its constituent segment files
/// (design §3 "Relocatable segment", §4.6 "Order"). SYSDAT names only a
/// segment's target base and bank, not its on-disk extent, so each
/// segment's own header (`size_pages`, plus a relocation bitmap when
/// `origin_page = 0`) is read to find where the next one starts.
pub fn split_segments(image: &[u8], sysdat: &SysDat) -> Result<Vec<SegmentFile>, ImageFormatError> {
    let active = sysdat.nmb_mem_seg as usize;
    let mut cursor = SYSDAT_SIZE;
    let mut out = Vec::with_capacity(active);
    for i in 0..active {
        let name = format!("SEG{i}");
        if image.len() < cursor + 4 {
            return Err(ImageFormatError::SegmentTruncated { name });
        }
        let header = &image[cursor..];
        let origin_page = header[1];
        let size_pages = u16::from_le_bytes([header[2], header[3]]) as usize;
        let size_bytes = size_pages * SYSDAT_SIZE;
        let bitmap_len = if origin_page == 0 { (size_bytes + 7) / 8 } else { 0 };
        let total = SYSDAT_SIZE + size_bytes + bitmap_len;
        if image.len() < cursor + total {
            return Err(ImageFormatError::SegmentTruncated { name });
        }
        out.push(SegmentFile { name, bytes: image[cursor..cursor + total].to_vec() });
        cursor += total;
    }
    Ok(out)
}

/// Lay down the port-trap trampolines and patch any vector slot that is
/// still the loader's `JP 0x0000` placeholder to jump through one.
fn repair_xios_stubs(cpu: &mut Cpu, bnkxios_base: u16) {
    for (i, off) in known_offsets().enumerate() {
        let trampoline_addr = TRAMPOLINE_BASE + i as u16 * TRAMPOLINE_STRIDE;
        let stub = [0x3E, off, 0xD3, 0xE0, 0xC9]; // LD A,off; OUT (0xE0),A; RET
        cpu.memory.bulk_load(0, trampoline_addr, &stub);

        let slot = bnkxios_base.wrapping_add(off as u16);
        let current = [
            cpu.memory.read(slot),
            cpu.memory.read(slot.wrapping_add(1)),
            cpu.memory.read(slot.wrapping_add(2)),
        ];
        if current == [0xC3, 0x00, 0x00] {
            let jp = [0xC3, (trampoline_addr & 0xff) as u8, (trampoline_addr >> 8) as u8];
            cpu.memory.bulk_load(0, slot, &jp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::memory::BankMemory;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    #[test]
    fn cold_boot_places_sector_and_sets_entry_point() {
        let file = NamedTempFile::new().unwrap();
        let mut image = vec![0u8; 256_256];
        image[0] = 0xF3; // DI
        std::fs::write(file.path(), &image).unwrap();

        let mut disks = DiskTable::new();
        disks.mount(0, file.path(), false).unwrap();
        let mut cpu = Cpu::new(BankMemory::with_defaults());
        cold_boot(&mut cpu, &mut disks, 0).unwrap();

        assert_eq!(cpu.memory.read(0x0000), 0xF3);
        assert_eq!(cpu.regs.pc, 0x0000);
        assert_eq!(cpu.regs.sp, 0x0100);
    }

    fn sample_sysdat() -> Vec<u8> {
        let mut raw = vec![0u8; 256];
        raw[0] = 0xFF; // mem_top
        raw[11] = 0xE4; // xdos_base
        raw[13] = 0xD2; // bnkxios_base
        raw[120] = 100; // nmb_records
        raw[121] = 0;
        raw
    }

    #[test]
    fn direct_load_sets_pc_sp_and_copies_sysdat_to_mem_top() {
        let sysdat = sample_sysdat();
        let context = Arc::new(Context::new(1));
        let mut xios = Xios::new(context, 1);
        let mut cpu = Cpu::new(BankMemory::with_defaults());

        direct_load(&mut cpu, &mut xios, &sysdat, &[]).unwrap();

        assert_eq!(cpu.regs.pc, 0xE400);
        assert_eq!(cpu.regs.sp, 0xFF00);
        for (i, &b) in sysdat.iter().enumerate() {
            assert_eq!(cpu.memory.read(0xFF00 + i as u16), b);
        }
    }
}
