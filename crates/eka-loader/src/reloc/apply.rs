//! ARM relocation engine
//!
//! For every entry, with the site at image offset `o`:
//!
//! - `S` = load base (the format only encodes self-relative fixups)
//! - `P` = load base + `o`, the runtime address of the site
//! - `A` = what the toolchain left at the site (the addend)
//!
//! Patching runs in two passes. The first validates every site and computes
//! every new value from the untouched image; the second writes them. An
//! error therefore never leaves a half-patched image behind.
//!
//! The addend is read from the buffer being patched, so a buffer must only be
//! relocated once. [`LoadedImage::rebase`](crate::LoadedImage::rebase) always
//! starts again from the pristine payload.

use crate::error::FormatError;

use super::{RelocDirectory, RelocKind, Section};

const IMM12_MASK: u32 = 0x0000_0FFF;
const IMM4_MASK: u32 = 0x000F_0000;
const LDR_UP_BIT: u32 = 1 << 23;
const THUMB_IMM5_SHIFT: u32 = 6;
const THUMB_IMM5_MASK: u32 = 0x1F << THUMB_IMM5_SHIFT;

/// The result of a PC-relative relocation does not fit its field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOverflow {
    /// Displacement that was requested
    pub value: i64,
}

/// Compute the new contents of a relocation site.
///
/// `current` is the site's little-endian contents zero-extended to 32 bits
/// (a full word, a Thumb halfword, or a byte depending on the kind's
/// width). The returned value has the same width. Unknown kinds return
/// `current` unchanged.
pub fn patch(kind: RelocKind, current: u32, s: u32, p: u32) -> Result<u32, PatchOverflow> {
    let patched = match kind {
        RelocKind::Abs32 => s.wrapping_add(current),
        RelocKind::Rel32 => s.wrapping_add(current).wrapping_sub(p),
        RelocKind::LdrPcG0 => {
            let imm = current & IMM12_MASK;
            let addend = if current & LDR_UP_BIT != 0 {
                imm
            } else {
                imm.wrapping_neg()
            };
            let displacement = s.wrapping_add(addend).wrapping_sub(p) as i32;
            let magnitude = displacement.unsigned_abs();
            if magnitude > IMM12_MASK {
                return Err(PatchOverflow {
                    value: i64::from(displacement),
                });
            }
            let up = if displacement >= 0 { LDR_UP_BIT } else { 0 };
            (current & !(IMM12_MASK | LDR_UP_BIT)) | up | magnitude
        }
        RelocKind::Abs16 => {
            let addend = ((current & IMM4_MASK) >> 4) | (current & IMM12_MASK);
            let value = s.wrapping_add(addend) & 0xFFFF;
            (current & !(IMM4_MASK | IMM12_MASK)) | ((value & 0xF000) << 4) | (value & IMM12_MASK)
        }
        RelocKind::Abs12 => {
            let value = s.wrapping_add(current & IMM12_MASK) & IMM12_MASK;
            (current & !IMM12_MASK) | value
        }
        RelocKind::ThmAbs5 => {
            let addend = (current & THUMB_IMM5_MASK) >> THUMB_IMM5_SHIFT;
            let value = s.wrapping_add(addend) & 0x1F;
            (current & !THUMB_IMM5_MASK) | (value << THUMB_IMM5_SHIFT)
        }
        RelocKind::Abs8 => s.wrapping_add(current) & 0xFF,
        RelocKind::Unknown(_) => current,
    };
    Ok(patched)
}

/// An entry that was left alone because its kind is not supported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedReloc {
    /// Directory the entry came from
    pub section: Section,
    /// Image offset of the untouched site
    pub site: usize,
    /// Raw kind code
    pub code: u8,
}

/// What a relocation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocSummary {
    /// Entries patched
    pub applied: usize,
    /// Entries with an unsupported kind
    pub skipped: usize,
    /// Where the skipped entries are
    pub skipped_sites: Vec<SkippedReloc>,
}

impl RelocSummary {
    /// True when every entry was applied
    pub fn is_complete(&self) -> bool {
        self.skipped == 0
    }
}

/// A site claimed by one entry; `None` marks a skipped entry that only
/// takes part in the overlap check.
struct PendingPatch {
    site: usize,
    width: usize,
    value: Option<u32>,
}

fn read_site(image: &[u8], site: usize, width: usize) -> Option<u32> {
    let bytes = image.get(site..site.checked_add(width)?)?;
    let mut word = [0u8; 4];
    word[..width].copy_from_slice(bytes);
    Some(u32::from_le_bytes(word))
}

fn write_site(image: &mut [u8], site: usize, width: usize, value: u32) {
    image[site..site + width].copy_from_slice(&value.to_le_bytes()[..width]);
}

/// Applies relocation directories against a fixed load base
#[derive(Debug, Clone, Copy)]
pub struct Relocator {
    base: u32,
    check_overlaps: bool,
}

impl Relocator {
    /// Relocator for `base`, rejecting overlapping sites
    pub fn new(base: u32) -> Self {
        Self {
            base,
            check_overlaps: true,
        }
    }

    /// Enable or disable the overlapping-site check
    pub fn with_overlap_check(mut self, enabled: bool) -> Self {
        self.check_overlaps = enabled;
        self
    }

    /// Load base in use
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Whether overlapping sites are rejected
    pub fn checks_overlaps(&self) -> bool {
        self.check_overlaps
    }

    /// Patch `image` in place.
    ///
    /// On error the image is left exactly as it was passed in.
    pub fn apply(
        &self,
        image: &mut [u8],
        directories: &[RelocDirectory],
    ) -> Result<RelocSummary, FormatError> {
        let mut summary = RelocSummary::default();
        let mut pending = Vec::with_capacity(directories.iter().map(|d| d.entries.len()).sum());

        for directory in directories {
            for entry in &directory.entries {
                let site = directory
                    .section_start
                    .checked_add(entry.offset as usize)
                    .unwrap_or(usize::MAX);

                if !entry.kind.is_known() {
                    log::warn!(
                        "Unsupported relocation kind {:#x} at {:#x} ({} section), left unpatched",
                        entry.kind.code(),
                        site,
                        directory.section
                    );
                    summary.skipped += 1;
                    summary.skipped_sites.push(SkippedReloc {
                        section: directory.section,
                        site,
                        code: entry.kind.code(),
                    });
                    pending.push(PendingPatch {
                        site,
                        width: entry.kind.width().max(1),
                        value: None,
                    });
                    continue;
                }

                let width = entry.kind.width();
                let current = read_site(image, site, width).ok_or(FormatError::OutOfBounds {
                    what: "patch site",
                    offset: site,
                    len: width,
                    bound: image.len(),
                })?;

                let p = self.base.wrapping_add(site as u32);
                let value = patch(entry.kind, current, self.base, p).map_err(|overflow| {
                    FormatError::RelocationOverflow {
                        kind: entry.kind,
                        site,
                        value: overflow.value,
                    }
                })?;

                log::trace!(
                    "{} at {:#x}: {:#x} -> {:#x}",
                    entry.kind,
                    site,
                    current,
                    value
                );
                pending.push(PendingPatch {
                    site,
                    width,
                    value: Some(value),
                });
            }
        }

        if self.check_overlaps {
            check_overlaps(&mut pending)?;
        }

        for pending_patch in &pending {
            if let Some(value) = pending_patch.value {
                write_site(image, pending_patch.site, pending_patch.width, value);
                summary.applied += 1;
            }
        }
        Ok(summary)
    }
}

fn check_overlaps(pending: &mut [PendingPatch]) -> Result<(), FormatError> {
    pending.sort_by_key(|p| p.site);
    for pair in pending.windows(2) {
        if pair[0].site.saturating_add(pair[0].width) > pair[1].site {
            return Err(FormatError::OverlappingRelocation {
                first: pair[0].site,
                second: pair[1].site,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reloc::{RelocDirectoryHeader, RelocEntry};

    fn directory(section_start: usize, entries: Vec<RelocEntry>) -> RelocDirectory {
        RelocDirectory {
            section: Section::Code,
            section_start,
            offset: 0,
            header: RelocDirectoryHeader {
                size: 0,
                count: entries.len() as u32,
            },
            entries,
        }
    }

    #[test]
    fn test_abs32() {
        assert_eq!(patch(RelocKind::Abs32, 0x1000, 0x8000, 0), Ok(0x9000));
        assert_eq!(
            patch(RelocKind::Abs32, 0xFFFF_FFF0, 0x20, 0),
            Ok(0x10),
            "wraps modulo 2^32"
        );
    }

    #[test]
    fn test_rel32() {
        assert_eq!(patch(RelocKind::Rel32, 0x10, 0x8000, 0x8004), Ok(0xC));
        assert_eq!(
            patch(RelocKind::Rel32, 0, 0x8000, 0x8010),
            Ok(0xFFFF_FFF0)
        );
    }

    #[test]
    fn test_ldr_pc_g0_forward() {
        // ldr r0, [pc, #0x20]
        let insn = 0xE59F_0020;
        // S + A - P = 0x8000 + 0x20 - 0x7F00 = 0x120
        assert_eq!(
            patch(RelocKind::LdrPcG0, insn, 0x8000, 0x7F00),
            Ok(0xE59F_0120)
        );
    }

    #[test]
    fn test_ldr_pc_g0_flips_to_negative() {
        // ldr r1, [pc, #-0x8]
        let insn = 0xE51F_1008;
        // S + A - P = 0x8000 - 8 - 0x8100 = -0x108
        assert_eq!(
            patch(RelocKind::LdrPcG0, insn, 0x8000, 0x8100),
            Ok(0xE51F_1108)
        );
        // and back to positive: 0x9000 - 8 - 0x8100 = 0xEF8
        assert_eq!(
            patch(RelocKind::LdrPcG0, insn, 0x9000, 0x8100),
            Ok(0xE59F_1EF8)
        );
    }

    #[test]
    fn test_ldr_pc_g0_overflow() {
        let insn = 0xE59F_0000;
        assert_eq!(
            patch(RelocKind::LdrPcG0, insn, 0x10000, 0x8000),
            Err(PatchOverflow { value: 0x8000 })
        );
    }

    #[test]
    fn test_abs16_movw() {
        // movw r0, #0x1234
        let insn = 0xE301_0234;
        // 0xABCD + 0x1234 = 0xBE01
        assert_eq!(
            patch(RelocKind::Abs16, insn, 0x0000_ABCD, 0),
            Ok(0xE30B_0E01)
        );
        // Only the low 16 bits of S + A are kept
        assert_eq!(patch(RelocKind::Abs16, 0xE300_0000, 0x1234_5678, 0), Ok(0xE305_0678));
    }

    #[test]
    fn test_abs12() {
        // ldr r0, [r1, #0x10]
        let insn = 0xE591_0010;
        assert_eq!(patch(RelocKind::Abs12, insn, 0x8123, 0), Ok(0xE591_0133));
    }

    #[test]
    fn test_thm_abs5() {
        // ldr r0, [r1, #(3 << 2)] -> imm5 = 3
        let insn = 0x68C8;
        // (3 + 0x25) & 0x1F = 0x08
        assert_eq!(patch(RelocKind::ThmAbs5, insn, 0x25, 0), Ok(0x6A08));
    }

    #[test]
    fn test_abs8() {
        assert_eq!(patch(RelocKind::Abs8, 0xF0, 0x8020, 0), Ok(0x10));
    }

    #[test]
    fn test_unknown_is_identity() {
        assert_eq!(
            patch(RelocKind::Unknown(0xC), 0xDEAD_BEEF, 0x8000, 0x8000),
            Ok(0xDEAD_BEEF)
        );
    }

    #[test]
    fn test_apply_patches_sites() {
        let mut image = vec![0u8; 0x20];
        image[0x10..0x14].copy_from_slice(&0x1000u32.to_le_bytes());
        image[0x14..0x18].copy_from_slice(&0x10u32.to_le_bytes());
        image[0x18] = 0x7F;

        let dirs = vec![directory(
            0x10,
            vec![
                RelocEntry::new(0, RelocKind::Abs32),
                RelocEntry::new(4, RelocKind::Rel32),
                RelocEntry::new(8, RelocKind::Abs8),
            ],
        )];
        let summary = Relocator::new(0x8000).apply(&mut image, &dirs).unwrap();

        assert_eq!(summary.applied, 3);
        assert!(summary.is_complete());
        assert_eq!(&image[0x10..0x14], &0x9000u32.to_le_bytes());
        // P = 0x8000 + 0x14
        assert_eq!(&image[0x14..0x18], &0x8010u32.wrapping_sub(0x8014).to_le_bytes());
        assert_eq!(image[0x18], 0x7F);
        assert_eq!(image[0x19], 0);
    }

    #[test]
    fn test_apply_skips_unknown_kind() {
        let mut image = vec![0xAAu8; 0x10];
        let dirs = vec![directory(
            0,
            vec![
                RelocEntry::new(4, RelocKind::Unknown(0x9)),
                RelocEntry::new(8, RelocKind::Abs32),
            ],
        )];
        let summary = Relocator::new(0x1000).apply(&mut image, &dirs).unwrap();

        assert_eq!(summary.applied, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            summary.skipped_sites,
            vec![SkippedReloc {
                section: Section::Code,
                site: 4,
                code: 0x9
            }]
        );
        assert_eq!(&image[4..8], &[0xAA; 4]);
        assert_eq!(&image[8..12], &0xAAAA_BAAAu32.to_le_bytes());
    }

    #[test]
    fn test_known_entry_cannot_overwrite_skipped_site() {
        let mut image = vec![0x11, 0x22, 0x33, 0x44, 0, 0, 0, 0];
        let dirs = vec![directory(
            0,
            vec![
                RelocEntry::new(0, RelocKind::Unknown(0xB)),
                RelocEntry::new(0, RelocKind::Abs32),
            ],
        )];
        let result = Relocator::new(0x1000).apply(&mut image, &dirs);

        assert!(matches!(
            result,
            Err(FormatError::OverlappingRelocation { first: 0, second: 0 })
        ));
        assert_eq!(&image[..4], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_skipped_site_claims_one_byte() {
        // Unknown kinds have no width; their footprint is the site byte itself
        let mut image = vec![0u8; 8];
        let dirs = vec![directory(
            0,
            vec![
                RelocEntry::new(3, RelocKind::Unknown(0xC)),
                RelocEntry::new(0, RelocKind::Abs32),
            ],
        )];
        assert!(matches!(
            Relocator::new(0x1000).apply(&mut image, &dirs),
            Err(FormatError::OverlappingRelocation { first: 0, second: 3 })
        ));

        let dirs = vec![directory(
            0,
            vec![
                RelocEntry::new(4, RelocKind::Unknown(0xC)),
                RelocEntry::new(0, RelocKind::Abs32),
            ],
        )];
        let summary = Relocator::new(0x1000).apply(&mut image, &dirs).unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_apply_out_of_bounds_writes_nothing() {
        let mut image = vec![0u8; 0x10];
        let dirs = vec![directory(
            0,
            vec![
                RelocEntry::new(0, RelocKind::Abs32),
                RelocEntry::new(0xE, RelocKind::Abs32),
            ],
        )];
        let result = Relocator::new(0x8000).apply(&mut image, &dirs);

        assert!(matches!(
            result,
            Err(FormatError::OutOfBounds { offset: 0xE, len: 4, .. })
        ));
        assert_eq!(image, vec![0u8; 0x10]);
    }

    #[test]
    fn test_apply_rejects_overlap() {
        let mut image = vec![0u8; 0x10];
        let dirs = vec![directory(
            0,
            vec![
                RelocEntry::new(4, RelocKind::Abs32),
                RelocEntry::new(6, RelocKind::ThmAbs5),
            ],
        )];
        let result = Relocator::new(0x8000).apply(&mut image, &dirs);

        assert!(matches!(
            result,
            Err(FormatError::OverlappingRelocation { first: 4, second: 6 })
        ));
        assert_eq!(image, vec![0u8; 0x10]);

        let summary = Relocator::new(0x8000)
            .with_overlap_check(false)
            .apply(&mut image, &dirs)
            .unwrap();
        assert_eq!(summary.applied, 2);
    }

    #[test]
    fn test_apply_overflow_writes_nothing() {
        let mut image = vec![0u8; 0x10];
        image[0..4].copy_from_slice(&0x1000u32.to_le_bytes());
        // ldr r0, [pc, #-0xFFF]; S - P = -8 pushes it past the 12-bit range
        image[8..12].copy_from_slice(&0xE51F_0FFFu32.to_le_bytes());
        let dirs = vec![directory(
            0,
            vec![
                RelocEntry::new(0, RelocKind::Abs32),
                RelocEntry::new(8, RelocKind::LdrPcG0),
            ],
        )];
        let before = image.clone();
        let result = Relocator::new(0x0010_0000).apply(&mut image, &dirs);

        assert!(matches!(
            result,
            Err(FormatError::RelocationOverflow {
                kind: RelocKind::LdrPcG0,
                site: 8,
                ..
            })
        ));
        assert_eq!(image, before);
    }

    #[test]
    fn test_apply_twice_from_same_input_is_deterministic() {
        let mut original = vec![0u8; 0x10];
        original[0..4].copy_from_slice(&0x44u32.to_le_bytes());
        let dirs = vec![directory(0, vec![RelocEntry::new(0, RelocKind::Abs32)])];

        let mut first = original.clone();
        let mut second = original.clone();
        Relocator::new(0x4000).apply(&mut first, &dirs).unwrap();
        Relocator::new(0x4000).apply(&mut second, &dirs).unwrap();
        assert_eq!(first, second);
    }
}
