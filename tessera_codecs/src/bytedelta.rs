use tessera_core::codec::{Filter, FilterParams};
use tessera_core::format::FilterId;

/// Byte delta over shuffled streams.
///
/// Meant to run after the shuffle filter: the block is treated as
/// `typesize` consecutive byte streams, and each stream stores the wrapping
/// difference of every byte from the previous byte of the same stream. A
/// nonzero slot meta overrides the typesize. Trailing bytes that do not fill
/// a whole element are copied.
pub struct ByteDeltaFilter;

fn streams(params: &FilterParams<'_>, len: usize) -> (usize, usize) {
    let typesize = if params.meta != 0 { params.meta as usize } else { params.typesize.max(1) };
    (typesize, len / typesize)
}

impl Filter for ByteDeltaFilter {
    fn id(&self) -> u8 {
        FilterId::ByteDelta.code()
    }

    fn name(&self) -> &'static str {
        "bytedelta"
    }

    fn forward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        anyhow::ensure!(src.len() == dst.len(), "bytedelta buffers differ in length");
        let (typesize, stream_len) = streams(params, src.len());
        let body = typesize * stream_len;
        for s in 0..typesize {
            let range = s * stream_len..(s + 1) * stream_len;
            let mut prev = 0u8;
            for j in range {
                dst[j] = src[j].wrapping_sub(prev);
                prev = src[j];
            }
        }
        dst[body..].copy_from_slice(&src[body..]);
        Ok(())
    }

    fn backward(&self, src: &[u8], dst: &mut [u8], params: &FilterParams<'_>) -> anyhow::Result<()> {
        anyhow::ensure!(src.len() == dst.len(), "bytedelta buffers differ in length");
        let (typesize, stream_len) = streams(params, src.len());
        let body = typesize * stream_len;
        for s in 0..typesize {
            let mut acc = 0u8;
            for j in s * stream_len..(s + 1) * stream_len {
                acc = acc.wrapping_add(src[j]);
                dst[j] = acc;
            }
        }
        dst[body..].copy_from_slice(&src[body..]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(typesize: usize, meta: u8) -> FilterParams<'static> {
        FilterParams { typesize, meta, block_index: 0, metalayers: None }
    }

    #[test]
    fn each_stream_restarts_from_zero() {
        // Two streams of three bytes: [5, 6, 8] and [1, 1, 1].
        let src = [5u8, 6, 8, 1, 1, 1];
        let mut dst = [0u8; 6];
        ByteDeltaFilter.forward(&src, &mut dst, &params(2, 0)).unwrap();
        assert_eq!(dst, [5, 1, 2, 1, 0, 0]);
        let mut back = [0u8; 6];
        ByteDeltaFilter.backward(&dst, &mut back, &params(2, 0)).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn meta_overrides_typesize_and_tail_is_kept() {
        let src: Vec<u8> = (0..103u32).map(|i| (i * 37 % 256) as u8).collect();
        let mut mid = vec![0u8; src.len()];
        let mut back = vec![0u8; src.len()];
        ByteDeltaFilter.forward(&src, &mut mid, &params(8, 4)).unwrap();
        assert_eq!(&mid[100..], &src[100..]);
        ByteDeltaFilter.backward(&mid, &mut back, &params(8, 4)).unwrap();
        assert_eq!(back, src);
    }
}
