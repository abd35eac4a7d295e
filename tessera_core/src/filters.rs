//! Built-in filters: byte shuffle, bit shuffle, and delta.
//!
//! All of them are length-preserving and leave any trailing bytes that do not
//! form a whole element (or, for bit shuffle, a whole group of 8 elements)
//! untouched.

use std::sync::Arc;

use crate::codec::{Filter, FilterParams};
use crate::format::FilterId;

fn check_lengths(src: &[u8], dst: &[u8]) -> anyhow::Result<()> {
    if src.len() != dst.len() {
        anyhow::bail!("filter buffers differ in length: src {} dst {}", src.len(), dst.len());
    }
    Ok(())
}

// ── Byte shuffle ───────────────────────────────────────────────────────────

/// Regroup bytes by significance: all first bytes of every element, then all
/// second bytes, and so on.
pub fn shuffle(typesize: usize, src: &[u8], dst: &mut [u8]) {
    let nelems = if typesize == 0 { 0 } else { src.len() / typesize };
    let body = nelems * typesize;
    if typesize <= 1 || nelems == 0 {
        dst.copy_from_slice(src);
        return;
    }
    for i in 0..typesize {
        let plane = &mut dst[i * nelems..(i + 1) * nelems];
        for (j, out) in plane.iter_mut().enumerate() {
            *out = src[j * typesize + i];
        }
    }
    dst[body..].copy_from_slice(&src[body..]);
}

/// Inverse of [`shuffle`].
pub fn unshuffle(typesize: usize, src: &[u8], dst: &mut [u8]) {
    let nelems = if typesize == 0 { 0 } else { src.len() / typesize };
    let body = nelems * typesize;
    if typesize <= 1 || nelems == 0 {
        dst.copy_from_slice(src);
        return;
    }
    for i in 0..typesize {
        let plane = &src[i * nelems..(i + 1) * nelems];
        for (j, byte) in plane.iter().enumerate() {
            dst[j * typesize + i] = *byte;
        }
    }
    dst[body..].copy_from_slice(&src[body..]);
}

// ── Bit shuffle ────────────────────────────────────────────────────────────

/// Number of elements bit shuffle transposes; the rest is copied verbatim.
fn bitshuffle_elems(typesize: usize, len: usize) -> usize {
    if typesize == 0 {
        0
    } else {
        (len / typesize) / 8 * 8
    }
}

/// Regroup bits by significance across groups of 8 elements.
///
/// Plane `p = byte * 8 + bit` holds that bit of every element, packed
/// LSB-first.
pub fn bitshuffle(typesize: usize, src: &[u8], dst: &mut [u8]) {
    let nelems = bitshuffle_elems(typesize, src.len());
    let body = nelems * typesize;
    let plane_bytes = nelems / 8;
    dst[..body].fill(0);
    for j in 0..nelems {
        for b in 0..typesize {
            let byte = src[j * typesize + b];
            if byte == 0 {
                continue;
            }
            for k in 0..8 {
                if (byte >> k) & 1 == 1 {
                    let plane = b * 8 + k;
                    dst[plane * plane_bytes + j / 8] |= 1 << (j % 8);
                }
            }
        }
    }
    dst[body..].copy_from_slice(&src[body..]);
}

/// Inverse of [`bitshuffle`].
pub fn bitunshuffle(typesize: usize, src: &[u8], dst: &mut [u8]) {
    let nelems = bitshuffle_elems(typesize, src.len());
    let body = nelems * typesize;
    let plane_bytes = nelems / 8;
    dst[..body].fill(0);
    for plane in 0..typesize * 8 {
        let (b, k) = (plane / 8, plane % 8);
        for jb in 0..plane_bytes {
            let byte = src[plane * plane_bytes + jb];
            if byte == 0 {
                continue;
            }
            for bit in 0..8 {
                if (byte >> bit) & 1 == 1 {
                    let j = jb * 8 + bit;
                    dst[j * typesize + b] |= 1 << k;
                }
            }
        }
    }
    dst[body..].copy_from_slice(&src[body..]);
}

// ── Delta ──────────────────────────────────────────────────────────────────

/// Replace every byte with its wrapping difference from the same byte of the
/// previous element.
pub fn delta_encode(typesize: usize, src: &[u8], dst: &mut [u8]) {
    let stride = typesize.max(1).min(src.len());
    dst[..stride].copy_from_slice(&src[..stride]);
    for i in stride..src.len() {
        dst[i] = src[i].wrapping_sub(src[i - stride]);
    }
}

/// Inverse of [`delta_encode`] (a running sum per byte lane).
pub fn delta_decode(typesize: usize, src: &[u8], dst: &mut [u8]) {
    let stride = typesize.max(1).min(src.len());
    dst[..stride].copy_from_slice(&src[..stride]);
    for i in stride..src.len() {
        dst[i] = src[i].wrapping_add(dst[i - stride]);
    }
}

// ── Filter impls ───────────────────────────────────────────────────────────

/// Identity filter occupying empty chain slots.
pub struct NoShuffleFilter;

impl Filter for NoShuffleFilter {
    fn id(&self) -> u8 {
        FilterId::NoShuffle.code()
    }

    fn name(&self) -> &'static str {
        "noshuffle"
    }

    fn forward(&self, src: &[u8], dst: &mut [u8], _params: &FilterParams<'_>) -> anyhow::Result<()> {
        check_lengths(src, dst)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn backward(&self, src: &[u8], dst: &mut [u8], _params: &FilterParams<'_>) -> anyhow::Result<()> {
        check_lengths(src, dst)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

pub struct ShuffleFilter;

impl Filter for ShuffleFilter {
    fn id(&self) -> u8 {
        FilterId::Shuffle.code()
    }

    fn name(&self) -> &'static str {
        "shuffle"
    }

    fn forward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        check_lengths(src, dst)?;
        shuffle(params.typesize, src, dst);
        Ok(())
    }

    fn backward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        check_lengths(src, dst)?;
        unshuffle(params.typesize, src, dst);
        Ok(())
    }
}

pub struct BitShuffleFilter;

impl Filter for BitShuffleFilter {
    fn id(&self) -> u8 {
        FilterId::BitShuffle.code()
    }

    fn name(&self) -> &'static str {
        "bitshuffle"
    }

    fn forward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        check_lengths(src, dst)?;
        bitshuffle(params.typesize, src, dst);
        Ok(())
    }

    fn backward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        check_lengths(src, dst)?;
        bitunshuffle(params.typesize, src, dst);
        Ok(())
    }
}

pub struct DeltaFilter;

impl Filter for DeltaFilter {
    fn id(&self) -> u8 {
        FilterId::Delta.code()
    }

    fn name(&self) -> &'static str {
        "delta"
    }

    fn forward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        check_lengths(src, dst)?;
        if !src.is_empty() {
            delta_encode(params.typesize, src, dst);
        }
        Ok(())
    }

    fn backward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        check_lengths(src, dst)?;
        if !src.is_empty() {
            delta_decode(params.typesize, src, dst);
        }
        Ok(())
    }
}

/// The filters every registry starts with.
pub(crate) fn builtin_filters() -> Vec<Arc<dyn Filter>> {
    vec![
        Arc::new(NoShuffleFilter),
        Arc::new(ShuffleFilter),
        Arc::new(BitShuffleFilter),
        Arc::new(DeltaFilter),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 13) as u8).collect()
    }

    #[test]
    fn shuffle_groups_bytes_by_significance() {
        let src = 0x0102u16
            .to_le_bytes()
            .into_iter()
            .chain(0x0304u16.to_le_bytes())
            .chain(0x0506u16.to_le_bytes())
            .collect::<Vec<u8>>();
        let mut dst = vec![0u8; src.len()];
        shuffle(2, &src, &mut dst);
        assert_eq!(dst, vec![0x02, 0x04, 0x06, 0x01, 0x03, 0x05]);
    }

    #[test]
    fn shuffle_inverts_with_tail() {
        for typesize in [1, 2, 3, 4, 8, 16] {
            let src = ramp(8 * 37 + 5);
            let mut mid = vec![0u8; src.len()];
            let mut back = vec![0u8; src.len()];
            shuffle(typesize, &src, &mut mid);
            unshuffle(typesize, &mid, &mut back);
            assert_eq!(back, src, "typesize {typesize}");
        }
    }

    #[test]
    fn bitshuffle_moves_low_bits_to_first_plane() {
        // Eight u8 elements with only bit 0 set in elements 0 and 7.
        let src = [1u8, 0, 0, 0, 0, 0, 0, 1];
        let mut dst = [0u8; 8];
        bitshuffle(1, &src, &mut dst);
        assert_eq!(dst[0], 0b1000_0001);
        assert!(dst[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn bitshuffle_inverts_with_tail() {
        for typesize in [1, 2, 4, 8, 5] {
            let src = ramp(typesize * 8 * 9 + typesize * 3 + 1);
            let mut mid = vec![0u8; src.len()];
            let mut back = vec![0u8; src.len()];
            bitshuffle(typesize, &src, &mut mid);
            bitunshuffle(typesize, &mid, &mut back);
            assert_eq!(back, src, "typesize {typesize}");
        }
    }

    #[test]
    fn delta_stores_lane_differences() {
        let src = [10u8, 20, 11, 22, 15, 30];
        let mut dst = [0u8; 6];
        delta_encode(2, &src, &mut dst);
        assert_eq!(dst, [10, 20, 1, 2, 4, 8]);
        let mut back = [0u8; 6];
        delta_decode(2, &dst, &mut back);
        assert_eq!(back, src);
    }

    #[test]
    fn delta_handles_short_and_wrapping_input() {
        let src = [200u8, 5, 250];
        let mut dst = [0u8; 3];
        let mut back = [0u8; 3];
        delta_encode(8, &src, &mut dst);
        assert_eq!(dst, src);
        delta_encode(1, &src, &mut dst);
        delta_decode(1, &dst, &mut back);
        assert_eq!(back, src);
    }

    #[test]
    fn filter_rejects_mismatched_buffers() {
        let params = FilterParams { typesize: 4, meta: 0, block_index: 0, metalayers: None };
        let mut dst = [0u8; 3];
        assert!(ShuffleFilter.forward(&[0u8; 4], &mut dst, &params).is_err());
    }
}
