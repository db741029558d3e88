#![forbid(unsafe_code)]
use super::error::{Corruption, Error, Result};
use super::utils::*;
use log::{debug, trace};
use std::io::Write;

/// Signature at the start of every patch.
pub const MAGIC: &[u8; 8] = b"BSDIFF40";

/// Size of the fixed patch header.
pub const HEADER_SIZE: usize = 32;

/// Size of a single encoded control block.
pub const CONTROL_SIZE: usize = 24;

/// In-memory patcher for uncompressed bsdiff 4.x patches.
///
/// Apply patch to source:
/// ```
/// use ubspatch::{Bspatch, Result};
///
/// fn bspatch(source: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
///     Bspatch::new(patch)?.apply(source)
/// }
/// ```
///
/// Refuse patches declaring a target larger than 64 MiB:
/// ```
/// use ubspatch::{Bspatch, Result};
///
/// fn bspatch(source: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
///     Bspatch::new(patch)?
///         .size_limit(64 * 1024 * 1024)
///         .apply(source)
/// }
/// ```
pub struct Bspatch<'p> {
    patch: PatchFile<'p>,
    limit: Option<u64>,
}

impl<'p> Bspatch<'p> {
    /// Parse the patch header, locate the sections and create new patcher
    /// configuration.
    ///
    /// Return error if the header is invalid or the sections do not fit in
    /// the patch.
    pub fn new(patch: &'p [u8]) -> Result<Self> {
        Ok(Bspatch {
            patch: parse(patch)?,
            limit: None,
        })
    }

    /// Refuse to apply patches declaring a target larger than `limit` bytes.
    ///
    /// The check happens before the target buffer is allocated.
    pub fn size_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Hint the final target size, as provided in the patch header.
    pub fn hint_target_size(&self) -> u64 {
        self.patch.header.new_size as u64
    }

    /// Parsed header of the patch.
    pub fn header(&self) -> Header {
        self.patch.header
    }

    /// Apply patch to the source data and return the target.
    pub fn apply(self, source: &[u8]) -> Result<Vec<u8>> {
        if let Some(limit) = self.limit {
            let declared = self.hint_target_size();
            if declared > limit {
                return Err(Error::SizeLimit { declared, limit });
            }
        }
        Context::new(self.patch, source).apply()
    }

    /// Apply patch to the source data and write the target out.
    ///
    /// Nothing is written unless the whole patch applies. The target size
    /// would be returned if no error occurs.
    pub fn apply_to<T: Write>(self, source: &[u8], mut target: T) -> Result<u64> {
        let data = self.apply(source)?;
        target.write_all(&data[..])?;
        target.flush()?;
        Ok(data.len() as u64)
    }
}

/// Validated patch header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Length of the control section.
    pub ctrl_len: usize,
    /// Length of the diff section.
    pub diff_len: usize,
    /// Exact length of the target.
    pub new_size: usize,
}

/// Parse and validate the 32-byte patch header.
pub fn parse_header(patch: &[u8]) -> Result<Header> {
    if patch.len() < HEADER_SIZE {
        return Err(Corruption::TooShort { len: patch.len() }.into());
    }
    if &patch[..8] != MAGIC {
        return Err(Corruption::BadMagic.into());
    }

    Ok(Header {
        ctrl_len: decode_length(patch, 8, "control length")?,
        diff_len: decode_length(patch, 16, "diff length")?,
        new_size: decode_length(patch, 24, "target size")?,
    })
}

fn decode_length(patch: &[u8], offset: usize, field: &'static str) -> Result<usize> {
    let value = decode_offset(patch, offset)?;
    if value < 0 {
        return Err(Corruption::NegativeHeaderField { field, value }.into());
    }
    Ok(value as usize)
}

struct PatchFile<'a> {
    header: Header,
    ctrls: &'a [u8],
    delta: &'a [u8],
    extra: &'a [u8],
}

/// Parse the patch header and split the body into its three sections.
fn parse(patch: &[u8]) -> Result<PatchFile> {
    let header = parse_header(patch)?;

    let end = HEADER_SIZE as u64 + header.ctrl_len as u64 + header.diff_len as u64;
    if end > patch.len() as u64 {
        return Err(Corruption::SectionsOverrun {
            end,
            len: patch.len(),
        }
        .into());
    }

    let (_, remain) = patch.split_at(HEADER_SIZE);
    let (ctrls, remain) = remain.split_at(header.ctrl_len);
    let (delta, extra) = remain.split_at(header.diff_len);

    Ok(PatchFile {
        header,
        ctrls,
        delta,
        extra,
    })
}

/// Bspatch context.
struct Context<'s, 'p> {
    source: &'s [u8],
    target: Vec<u8>,

    patch: PatchFile<'p>,

    ctrl_pos: usize,
    diff_pos: usize,
    extra_pos: usize,
    old_pos: i64,
    new_pos: usize,
}

impl<'s, 'p> Context<'s, 'p> {
    /// Create context.
    pub fn new(patch: PatchFile<'p>, source: &'s [u8]) -> Self {
        Context {
            source,
            target: vec![0; patch.header.new_size],
            patch,
            ctrl_pos: 0,
            diff_pos: 0,
            extra_pos: 0,
            old_pos: 0,
            new_pos: 0,
        }
    }

    /// Apply the patch file.
    pub fn apply(mut self) -> Result<Vec<u8>> {
        debug!(
            "applying patch: {} control, {} diff, {} extra bytes to {} source bytes, target {} bytes",
            self.patch.ctrls.len(),
            self.patch.delta.len(),
            self.patch.extra.len(),
            self.source.len(),
            self.target.len()
        );

        while let Some(result) = self.next() {
            let Control { add, copy, seek } = result?;
            trace!(
                "control #{}: add {}, copy {}, seek {}",
                self.ctrl_pos / CONTROL_SIZE - 1,
                add,
                copy,
                seek
            );
            self.add(add)?;
            self.copy(copy)?;
            self.seek(seek);
        }

        debug!(
            "patched {} bytes with {} control blocks",
            self.new_pos,
            self.ctrl_pos / CONTROL_SIZE
        );
        Ok(self.target)
    }

    /// Read the next control, unless the target is complete.
    fn next(&mut self) -> Option<Result<Control>> {
        if self.new_pos >= self.target.len() {
            return None;
        }
        Some(self.read_control())
    }

    fn read_control(&mut self) -> Result<Control> {
        let ctrls = self.patch.ctrls;
        let offset = self.ctrl_pos;
        if ctrls.len() - offset < CONTROL_SIZE {
            return Err(Corruption::TruncatedControl { offset }.into());
        }

        let add = decode_offset(ctrls, offset)?;
        let copy = decode_offset(ctrls, offset + 8)?;
        let seek = decode_offset(ctrls, offset + 16)?;
        if add < 0 || copy < 0 {
            return Err(Corruption::NegativeControlLength { offset }.into());
        }
        self.ctrl_pos += CONTROL_SIZE;

        Ok(Control {
            add: add as usize,
            copy: copy as usize,
            seek,
        })
    }

    /// Copy delta to target and add the overlapping source bytes.
    fn add(&mut self, count: usize) -> Result<()> {
        let end = self.reserve(count)?;
        let delta = self.patch.delta;
        let pos = self.diff_pos;
        let delta = delta
            .get(pos..)
            .and_then(|d| d.get(..count))
            .ok_or(Corruption::DiffExhausted { pos, count })?;

        let out = &mut self.target[self.new_pos..end];
        out.copy_from_slice(delta);
        self.diff_pos += count;

        // Source bytes outside of [0, len) contribute nothing.
        let lo = Ord::max(self.old_pos, 0);
        let hi = Ord::min(self.old_pos + count as i64, self.source.len() as i64);
        if lo < hi {
            let skip = (lo - self.old_pos) as usize;
            let old = &self.source[lo as usize..hi as usize];
            for (t, &s) in out[skip..].iter_mut().zip(old.iter()) {
                *t = t.wrapping_add(s);
            }
        }

        self.new_pos = end;
        self.old_pos += count as i64;
        Ok(())
    }

    /// Copy extra data to target.
    fn copy(&mut self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let end = self.reserve(count)?;
        let extra = self.patch.extra;
        let pos = self.extra_pos;
        let extra = extra
            .get(pos..)
            .and_then(|e| e.get(..count))
            .ok_or(Corruption::ExtraExhausted { pos, count })?;

        self.target[self.new_pos..end].copy_from_slice(extra);
        self.extra_pos += count;
        self.new_pos = end;
        Ok(())
    }

    /// Move the cursor on source.
    fn seek(&mut self, offset: i64) {
        self.old_pos += offset;
    }

    /// End of the next `count` target bytes, if they fit in the target.
    fn reserve(&self, count: usize) -> Result<usize> {
        let size = self.target.len();
        match self.new_pos.checked_add(count) {
            Some(end) if end <= size => Ok(end),
            _ => Err(Corruption::TargetOverrun {
                pos: self.new_pos,
                count,
                size,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ubspatch_test_utils::PatchBuilder;

    fn apply(source: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
        Bspatch::new(patch)?.apply(source)
    }

    fn corruption(result: Result<Vec<u8>>) -> Corruption {
        match result {
            Err(Error::CorruptPatch(c)) => c,
            other => panic!("expected corrupt patch, got {:?}", other),
        }
    }

    #[test]
    fn header_fields() {
        let patch = PatchBuilder::new()
            .control(3, 2, -1)
            .delta(b"\0\0\0")
            .extra(b"xy")
            .build();
        let header = parse_header(&patch[..]).unwrap();
        assert_eq!(
            header,
            Header {
                ctrl_len: 24,
                diff_len: 3,
                new_size: 5,
            }
        );
        assert_eq!(Bspatch::new(&patch[..]).unwrap().hint_target_size(), 5);
    }

    #[test]
    fn short_header() {
        let magic = MAGIC.repeat(4);
        for n in [0, 1, 8, 31].iter() {
            let patch = &magic[..*n];
            assert_eq!(
                corruption(apply(b"source", patch)),
                Corruption::TooShort { len: *n }
            );
        }
    }

    #[test]
    fn bad_magic() {
        let mut patch = PatchBuilder::new().build();
        patch[7] = b'1';
        assert_eq!(corruption(apply(b"", &patch[..])), Corruption::BadMagic);
    }

    #[test]
    fn negative_header_fields() {
        let patch = PatchBuilder::new().target_size(-1).build();
        assert_eq!(
            corruption(apply(b"", &patch[..])),
            Corruption::NegativeHeaderField {
                field: "target size",
                value: -1,
            }
        );

        // A zero high word with the top bit of the low word set is negative too.
        let mut patch = PatchBuilder::new().build();
        patch[8..16].copy_from_slice(&[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]);
        assert_eq!(
            corruption(apply(b"", &patch[..])),
            Corruption::NegativeHeaderField {
                field: "control length",
                value: -1,
            }
        );
    }

    #[test]
    fn header_offset_range() {
        let mut patch = PatchBuilder::new().build();
        patch[20..24].copy_from_slice(&[1, 0, 0, 0]);
        match apply(b"", &patch[..]) {
            Err(Error::OffsetRange { high }) => assert_eq!(high, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sections_overrun() {
        let mut patch = PatchBuilder::new().control(1, 0, 0).delta(b"\0").build();
        patch.pop();
        assert_eq!(
            corruption(apply(b"", &patch[..])),
            Corruption::SectionsOverrun { end: 57, len: 56 }
        );
    }

    #[test]
    fn empty_target() {
        let patch = PatchBuilder::new().build();
        assert_eq!(patch.len(), HEADER_SIZE);
        assert_eq!(apply(b"anything", &patch[..]).unwrap(), b"");
    }

    #[test]
    fn zero_delta_copies_source() {
        let source = b"0123456789";
        let patch = PatchBuilder::new()
            .control(4, 0, 4)
            .delta(&[0; 4])
            .control(2, 0, 0)
            .delta(&[0; 2])
            .build();
        // Second block starts at source offset 4 + 4 = 8.
        assert_eq!(apply(source, &patch[..]).unwrap(), b"012389");
    }

    #[test]
    fn delta_wraps() {
        let patch = PatchBuilder::new()
            .control(3, 0, 0)
            .delta(&[1, 0x80, 0xff])
            .build();
        assert_eq!(apply(&[0xff, 0x80, 2], &patch[..]).unwrap(), [0, 0, 1]);
    }

    #[test]
    fn extra_does_not_move_source() {
        let patch = PatchBuilder::new()
            .control(2, 3, 0)
            .delta(&[0, 0])
            .extra(b"XYZ")
            .control(2, 0, 0)
            .delta(&[0, 0])
            .build();
        assert_eq!(apply(b"abcdef", &patch[..]).unwrap(), b"abXYZcd");
    }

    #[test]
    fn source_out_of_bounds() {
        // Seek before the start, then run across both ends of the source.
        let patch = PatchBuilder::new()
            .control(0, 0, -2)
            .control(7, 0, 0)
            .delta(&[b'-', b'-', 0, 0, 0, b'+', b'+'])
            .build();
        assert_eq!(apply(b"abc", &patch[..]).unwrap(), b"--abc++");
    }

    #[test]
    fn negative_seek() {
        let patch = PatchBuilder::new()
            .control(3, 0, -3)
            .delta(&[0; 3])
            .control(3, 0, 0)
            .delta(&[1; 3])
            .build();
        assert_eq!(apply(b"abc", &patch[..]).unwrap(), b"abcbcd");
    }

    #[test]
    fn overrun_by_add() {
        // 6 - 1 would be exactly 5, but the first block alone overruns.
        let patch = PatchBuilder::new()
            .control(6, 0, 0)
            .delta(&[0; 6])
            .control(-1, 0, 0)
            .target_size(5)
            .build();
        assert_eq!(
            corruption(apply(b"abcdef", &patch[..])),
            Corruption::TargetOverrun {
                pos: 0,
                count: 6,
                size: 5,
            }
        );
    }

    #[test]
    fn overrun_after_progress() {
        let patch = PatchBuilder::new()
            .control(4, 0, 0)
            .delta(&[0; 4])
            .control(3, 0, 0)
            .delta(&[0; 3])
            .target_size(5)
            .build();
        assert_eq!(
            corruption(apply(b"abcdefg", &patch[..])),
            Corruption::TargetOverrun {
                pos: 4,
                count: 3,
                size: 5,
            }
        );
    }

    #[test]
    fn overrun_by_copy() {
        let patch = PatchBuilder::new()
            .control(2, 4, 0)
            .delta(&[0; 2])
            .extra(b"wxyz")
            .target_size(5)
            .build();
        assert_eq!(
            corruption(apply(b"ab", &patch[..])),
            Corruption::TargetOverrun {
                pos: 2,
                count: 4,
                size: 5,
            }
        );
    }

    #[test]
    fn truncated_control() {
        let patch = PatchBuilder::new()
            .control(2, 0, 0)
            .delta(&[0; 2])
            .raw_control(&[0; 23])
            .target_size(4)
            .build();
        assert_eq!(
            corruption(apply(b"abcd", &patch[..])),
            Corruption::TruncatedControl { offset: 24 }
        );
    }

    #[test]
    fn missing_control() {
        let patch = PatchBuilder::new().target_size(1).build();
        assert_eq!(
            corruption(apply(b"a", &patch[..])),
            Corruption::TruncatedControl { offset: 0 }
        );
    }

    #[test]
    fn negative_control_lengths() {
        let patch = PatchBuilder::new().control(0, -2, 0).target_size(1).build();
        assert_eq!(
            corruption(apply(b"", &patch[..])),
            Corruption::NegativeControlLength { offset: 0 }
        );
    }

    #[test]
    fn control_offset_range() {
        let mut patch = PatchBuilder::new().control(1, 0, 0).delta(&[0]).build();
        // High word of `seek`.
        patch[HEADER_SIZE + 20..HEADER_SIZE + 24].copy_from_slice(&[0, 0, 0, 0x40]);
        match apply(b"a", &patch[..]) {
            Err(Error::OffsetRange { high }) => assert_eq!(high, 0x4000_0000),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sections_exhausted() {
        let patch = PatchBuilder::new()
            .control(2, 0, 0)
            .delta(&[0])
            .target_size(2)
            .build();
        assert_eq!(
            corruption(apply(b"ab", &patch[..])),
            Corruption::DiffExhausted { pos: 0, count: 2 }
        );

        let patch = PatchBuilder::new()
            .control(0, 2, 0)
            .extra(b"e")
            .target_size(2)
            .build();
        assert_eq!(
            corruption(apply(b"", &patch[..])),
            Corruption::ExtraExhausted { pos: 0, count: 2 }
        );
    }

    #[test]
    fn trailing_bytes_ignored() {
        let patch = PatchBuilder::new()
            .control(1, 1, 0)
            .delta(&[0, 9, 9])
            .extra(b"!??")
            .control(5, 5, 5)
            .target_size(2)
            .build();
        assert_eq!(apply(b"a", &patch[..]).unwrap(), b"a!");
    }

    #[test]
    fn size_limit() {
        let patch = PatchBuilder::new().control(0, 4, 0).extra(b"abcd").build();
        match Bspatch::new(&patch[..]).unwrap().size_limit(3).apply(b"") {
            Err(Error::SizeLimit { declared, limit }) => assert_eq!((declared, limit), (4, 3)),
            other => panic!("unexpected {:?}", other),
        }
        let target = Bspatch::new(&patch[..]).unwrap().size_limit(4).apply(b"").unwrap();
        assert_eq!(target, b"abcd");
    }

    #[test]
    fn apply_to_writer() {
        let patch = PatchBuilder::new().control(0, 4, 0).extra(b"abcd").build();
        let mut out = Vec::new();
        let n = Bspatch::new(&patch[..]).unwrap().apply_to(b"", &mut out).unwrap();
        assert_eq!(n, 4);
        assert_eq!(out, b"abcd");

        let mut out = Vec::new();
        let bad = PatchBuilder::new().control(0, 4, 0).extra(b"ab").build();
        assert!(Bspatch::new(&bad[..]).unwrap().apply_to(b"", &mut out).is_err());
        assert!(out.is_empty());
    }
}
