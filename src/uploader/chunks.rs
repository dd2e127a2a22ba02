//! Growing-size chunk layout for uploads

/// Cumulative boundaries of the first eight chunks, in bytes.
/// After the last entry the spacing settles at 1 MiB.
const HEAD_BOUNDARIES: [u64; 8] = [
    0,
    128 * 1024,
    384 * 1024,
    768 * 1024,
    1280 * 1024,
    1920 * 1024,
    2688 * 1024,
    3584 * 1024,
];

/// First boundary of the 1 MiB plateau
const PLATEAU_START: u64 = 4608 * 1024;

/// Boundary spacing once the schedule plateaus
const PLATEAU_STEP: u64 = 1024 * 1024;

/// One planned byte range of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Zero-based chunk index, monotone with `start`
    pub index: u64,
    /// First byte of the range (inclusive)
    pub start: u64,
    /// One past the last byte of the range
    pub end: u64,
}

impl ChunkRange {
    /// Byte length of the range
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the range covers no bytes
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Partition `[0, file_size)` into the service's growing-size chunk layout.
///
/// Boundaries strictly below `file_size` are taken from the fixed schedule,
/// with `file_size` itself terminating the last chunk; an exact hit on a
/// boundary produces no zero-length trailing chunk. An empty file yields no
/// chunks at all.
pub fn plan_chunks(file_size: u64) -> Vec<ChunkRange> {
    let mut starts: Vec<u64> = HEAD_BOUNDARIES
        .iter()
        .copied()
        .filter(|&b| b < file_size)
        .collect();
    let mut boundary = PLATEAU_START;
    while boundary < file_size {
        starts.push(boundary);
        boundary += PLATEAU_STEP;
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| ChunkRange {
            index: i as u64,
            start,
            end: starts.get(i + 1).copied().unwrap_or(file_size),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(file_size: u64) -> Vec<(u64, u64)> {
        plan_chunks(file_size)
            .into_iter()
            .map(|c| (c.start, c.end))
            .collect()
    }

    #[test]
    fn empty_file_has_no_chunks() {
        assert!(plan_chunks(0).is_empty());
    }

    #[test]
    fn small_file_is_one_chunk() {
        assert_eq!(ranges(1), vec![(0, 1)]);
        assert_eq!(ranges(100_000), vec![(0, 100_000)]);
    }

    #[test]
    fn exact_boundary_has_no_trailing_chunk() {
        assert_eq!(ranges(131_072), vec![(0, 131_072)]);
        assert_eq!(ranges(393_216), vec![(0, 131_072), (131_072, 393_216)]);
    }

    #[test]
    fn two_chunk_file() {
        assert_eq!(ranges(200_000), vec![(0, 131_072), (131_072, 200_000)]);
    }

    #[test]
    fn five_megabyte_layout() {
        let chunks = plan_chunks(5_000_000);
        let starts: Vec<u64> = chunks.iter().map(|c| c.start).collect();
        assert_eq!(
            starts,
            vec![
                0, 131_072, 393_216, 786_432, 1_310_720, 1_966_080, 2_752_512, 3_670_016,
                4_718_592
            ]
        );
        assert_eq!(chunks.last().unwrap().end, 5_000_000);
    }

    #[test]
    fn chunks_partition_the_file() {
        for file_size in [
            1,
            1000,
            131_071,
            131_072,
            131_073,
            1_000_000,
            4_718_592,
            5_000_000,
            20_000_000,
        ] {
            let chunks = plan_chunks(file_size);
            assert_eq!(chunks[0].start, 0);
            assert_eq!(chunks.last().unwrap().end, file_size);
            for pair in chunks.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
                assert_eq!(pair[0].index + 1, pair[1].index);
            }
            assert!(chunks.iter().all(|c| !c.is_empty()));
        }
    }

    #[test]
    fn sizes_grow_then_plateau_at_one_mebibyte() {
        // ends exactly on a plateau boundary, so every chunk is full-sized
        let chunks = plan_chunks((4608 + 10 * 1024) * 1024);
        let sizes: Vec<u64> = chunks.iter().map(ChunkRange::len).collect();
        for pair in sizes.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(sizes[8..].iter().all(|&s| s == PLATEAU_STEP));
    }
}
