//! Reed-Solomon forward error correction for frame segments.
//!
//! Parity is computed over GF(2^8) across `(n_data, n_parity)` equal-length
//! slices of the zero-padded frame payload. Any `n_data` of the
//! `n_data + n_parity` slices recover the payload exactly.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{NdnRtcError, NdnRtcResult};

/// Relative cost weight of a parity segment vs a data segment, used when
/// computing assembled levels.
pub fn parity_weight() -> f64 {
    0.3
}

/// Number of parity segments for a payload of `n_data` segments at the given
/// ratio. At least one parity segment is produced whenever FEC is on.
pub fn parity_segments_num(n_data: usize, ratio: f64) -> usize {
    ((ratio * n_data as f64).ceil() as usize).max(1)
}

/// Encoder for one frame: fixed `(n_data, n_parity)` geometry and slice
/// length.
pub struct Rs28Encoder {
    codec: ReedSolomon,
    n_data: usize,
    n_parity: usize,
    slice_len: usize,
}

impl Rs28Encoder {
    pub fn new(n_data: usize, n_parity: usize, slice_len: usize) -> NdnRtcResult<Self> {
        let codec = ReedSolomon::new(n_data, n_parity)
            .map_err(|e| NdnRtcError::InvalidState(format!("fec geometry rejected: {:?}", e)))?;
        Ok(Rs28Encoder {
            codec,
            n_data,
            n_parity,
            slice_len,
        })
    }

    /// Produces `n_parity` parity slices over the payload. The payload is
    /// zero-padded to `n_data · slice_len` internally.
    pub fn encode(&self, payload: &[u8]) -> NdnRtcResult<Vec<Vec<u8>>> {
        if payload.len() > self.n_data * self.slice_len {
            return Err(NdnRtcError::InvalidState(format!(
                "payload of {} bytes exceeds fec geometry {}x{}",
                payload.len(),
                self.n_data,
                self.slice_len
            )));
        }

        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.n_data + self.n_parity);
        for i in 0..self.n_data {
            let start = (i * self.slice_len).min(payload.len());
            let end = ((i + 1) * self.slice_len).min(payload.len());
            let mut slice = payload[start..end].to_vec();
            slice.resize(self.slice_len, 0);
            shards.push(slice);
        }
        shards.extend(std::iter::repeat_with(|| vec![0u8; self.slice_len]).take(self.n_parity));

        self.codec
            .encode(&mut shards)
            .map_err(|e| NdnRtcError::InvalidState(format!("fec encode failed: {:?}", e)))?;

        Ok(shards.split_off(self.n_data))
    }
}

/// Decoder for one frame. Feed it whichever slices arrived; it reconstructs
/// the missing data slices when at least `n_data` are present.
pub struct Rs28Decoder {
    codec: ReedSolomon,
    n_data: usize,
    n_parity: usize,
    slice_len: usize,
}

impl Rs28Decoder {
    pub fn new(n_data: usize, n_parity: usize, slice_len: usize) -> NdnRtcResult<Self> {
        let codec = ReedSolomon::new(n_data, n_parity)
            .map_err(|e| NdnRtcError::InvalidState(format!("fec geometry rejected: {:?}", e)))?;
        Ok(Rs28Decoder {
            codec,
            n_data,
            n_parity,
            slice_len,
        })
    }

    /// Reconstructs the contiguous data payload (`n_data · slice_len` bytes,
    /// padding included) from partial slices. Slice indices are segment
    /// numbers; parity slices follow data slices.
    pub fn decode(
        &self,
        data_slices: &[(usize, &[u8])],
        parity_slices: &[(usize, &[u8])],
    ) -> NdnRtcResult<Vec<u8>> {
        let mut shards: Vec<Option<Vec<u8>>> = vec![None; self.n_data + self.n_parity];
        for &(idx, slice) in data_slices {
            if idx < self.n_data {
                shards[idx] = Some(normalized(slice, self.slice_len));
            }
        }
        for &(idx, slice) in parity_slices {
            if idx < self.n_parity {
                shards[self.n_data + idx] = Some(normalized(slice, self.slice_len));
            }
        }

        self.codec
            .reconstruct_data(&mut shards)
            .map_err(|e| NdnRtcError::InvalidState(format!("fec reconstruct failed: {:?}", e)))?;

        let mut payload = Vec::with_capacity(self.n_data * self.slice_len);
        for shard in shards.into_iter().take(self.n_data) {
            payload.extend_from_slice(&shard.expect("data shard present after reconstruct"));
        }
        Ok(payload)
    }
}

fn normalized(slice: &[u8], slice_len: usize) -> Vec<u8> {
    let mut v = slice.to_vec();
    v.resize(slice_len, 0);
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_count_is_never_zero_when_enabled() {
        assert_eq!(parity_segments_num(1, 0.2), 1);
        assert_eq!(parity_segments_num(5, 1.0), 5);
        assert_eq!(parity_segments_num(5, 0.5), 3);
    }

    #[test]
    fn encode_then_full_decode_is_identity() {
        let payload: Vec<u8> = (0..250u8).cycle().take(950).collect();
        let (n_data, n_parity, slice_len) = (5, 2, 200);
        let enc = Rs28Encoder::new(n_data, n_parity, slice_len).unwrap();
        let parity = enc.encode(&payload).unwrap();
        assert_eq!(parity.len(), n_parity);

        let data_slices: Vec<(usize, Vec<u8>)> = (0..n_data)
            .map(|i| {
                let start = i * slice_len;
                let end = ((i + 1) * slice_len).min(payload.len());
                (i, payload[start..end].to_vec())
            })
            .collect();
        let refs: Vec<(usize, &[u8])> =
            data_slices.iter().map(|(i, s)| (*i, s.as_slice())).collect();

        let dec = Rs28Decoder::new(n_data, n_parity, slice_len).unwrap();
        let recovered = dec.decode(&refs, &[]).unwrap();
        assert_eq!(&recovered[..payload.len()], payload.as_slice());
    }

    #[test]
    fn any_k_subset_recovers_the_payload() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(990).collect();
        let (n_data, n_parity, slice_len) = (5, 2, 200);
        let enc = Rs28Encoder::new(n_data, n_parity, slice_len).unwrap();
        let parity = enc.encode(&payload).unwrap();

        // segments 2 and 3 lost, both parity segments arrived
        let mut data_slices: Vec<(usize, Vec<u8>)> = vec![];
        for i in [0usize, 1, 4] {
            let start = i * slice_len;
            let end = ((i + 1) * slice_len).min(payload.len());
            data_slices.push((i, payload[start..end].to_vec()));
        }
        let data_refs: Vec<(usize, &[u8])> =
            data_slices.iter().map(|(i, s)| (*i, s.as_slice())).collect();
        let parity_refs: Vec<(usize, &[u8])> =
            parity.iter().enumerate().map(|(i, s)| (i, s.as_slice())).collect();

        let dec = Rs28Decoder::new(n_data, n_parity, slice_len).unwrap();
        let recovered = dec.decode(&data_refs, &parity_refs).unwrap();
        assert_eq!(
            &recovered[..payload.len()],
            payload.as_slice(),
            "payload must be byte-identical after recovery"
        );
    }

    #[test]
    fn too_few_slices_fail() {
        let (n_data, n_parity, slice_len) = (5, 2, 100);
        let dec = Rs28Decoder::new(n_data, n_parity, slice_len).unwrap();
        let only_two: Vec<(usize, &[u8])> = vec![(0, &[0u8; 100][..]), (1, &[1u8; 100][..])];
        assert!(dec.decode(&only_two, &[]).is_err());
    }
}
