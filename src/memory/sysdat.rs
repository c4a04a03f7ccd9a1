//! SYSDAT: the 256-byte configuration block at the top of a direct-load
//! system image (design §3). Every field below is a *page index*; multiply
//! by 256 to get a byte address.

use crate::error::ImageFormatError;

pub const SYSDAT_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub base: u8,
    pub size: u8,
    pub attr: u8,
    pub bank: u8,
}

#[derive(Debug, Clone)]
pub struct SysDat {
    pub mem_top: u8,
    pub nmb_cns: u8,
    pub bank_switched: u8,
    pub xios_jmp_tbl_base: u8,
    pub resbdos_base: u8,
    pub xdos_base: u8,
    pub bnkxios_base: u8,
    pub bnkbdos_base: u8,
    pub nmb_mem_seg: u8,
    pub segments: [SegmentDescriptor; 8],
    pub nmb_records: u16,
    pub ticks_per_second: u8,
    pub system_drive: u8,
    pub common_base: u8,
    pub bnkxdos_base: u8,
    pub tmp_base: u8,
    /// The raw 256-byte block, kept verbatim so it can be copied back into
    /// guest memory unmodified after the loader relocates segments.
    pub raw: [u8; SYSDAT_SIZE],
}

impl SysDat {
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageFormatError> {
        if bytes.len() < SYSDAT_SIZE {
            return Err(ImageFormatError::SysdatTruncated(bytes.len()));
        }
        let mut raw = [0u8; SYSDAT_SIZE];
        raw.copy_from_slice(&bytes[..SYSDAT_SIZE]);

        let mut segments = [SegmentDescriptor { base: 0, size: 0, attr: 0, bank: 0 }; 8];
        for (i, seg) in segments.iter_mut().enumerate() {
            let off = 16 + i * 4;
            *seg = SegmentDescriptor {
                base: raw[off],
                size: raw[off + 1],
                attr: raw[off + 2],
                bank: raw[off + 3],
            };
        }

        Ok(SysDat {
            mem_top: raw[0],
            nmb_cns: raw[1],
            bank_switched: raw[4],
            xios_jmp_tbl_base: raw[7],
            resbdos_base: raw[8],
            xdos_base: raw[11],
            bnkxios_base: raw[13],
            bnkbdos_base: raw[14],
            nmb_mem_seg: raw[15],
            segments,
            nmb_records: u16::from_le_bytes([raw[120], raw[121]]),
            ticks_per_second: raw[122],
            system_drive: raw[123],
            common_base: raw[124],
            bnkxdos_base: raw[242],
            tmp_base: raw[247],
            raw,
        })
    }

    pub fn mem_top_addr(&self) -> u16 {
        (self.mem_top as u16) << 8
    }

    pub fn xdos_base_addr(&self) -> u16 {
        (self.xdos_base as u16) << 8
    }

    pub fn bnkxios_base_addr(&self) -> u16 {
        (self.bnkxios_base as u16) << 8
    }

    pub fn common_base_addr(&self) -> u16 {
        (self.common_base as u16) << 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut raw = vec![0u8; SYSDAT_SIZE];
        raw[0] = 0xFF; // mem_top
        raw[1] = 4; // nmb_cns
        raw[11] = 0xE4; // xdos_base
        raw[13] = 0xD2; // bnkxios_base
        raw[120] = 100; // nmb_records low byte
        raw[121] = 0;
        raw
    }

    #[test]
    fn parses_declared_fields() {
        let sys = SysDat::parse(&sample()).unwrap();
        assert_eq!(sys.mem_top, 0xFF);
        assert_eq!(sys.nmb_cns, 4);
        assert_eq!(sys.xdos_base_addr(), 0xE400);
        assert_eq!(sys.bnkxios_base_addr(), 0xD200);
        assert_eq!(sys.nmb_records, 100);
    }

    #[test]
    fn rejects_truncated_block() {
        let short = vec![0u8; 10];
        assert!(matches!(SysDat::parse(&short), Err(ImageFormatError::SysdatTruncated(10))));
    }
}
