//! Readers for the Illumina InterOp binary metric files.
//!
//! A sequencer drops fixed-record little-endian binaries under
//! `<run>/InterOp/` while it runs. Three of them carry everything the
//! run-quality summary needs:
//!
//! - `TileMetricsOut.bin` (v2) — per-tile density, cluster counts,
//!   phasing/prephasing and percent-aligned, tagged by a numeric code;
//! - `QMetricsOut.bin` (v4–v6) — per-cycle histograms of base calls by
//!   Q score, optionally binned;
//! - `ErrorMetricsOut.bin` (v3) — per-cycle PhiX error rates. This file only
//!   exists when an aligned control was spiked in, so it is optional and its
//!   absence surfaces as a null error rate.
//!
//! The reader aggregates tiles and cycles into one [`RunQuality`] row per
//! (read, lane) pair. Aggregates over an empty set are reported as `None`
//! rather than NaN.

use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use indexmap::IndexMap;

/// Tile metric codes (TileMetricsOut v2).
const CODE_DENSITY: u16 = 100;
const CODE_DENSITY_PF: u16 = 101;
const CODE_CLUSTER_COUNT: u16 = 102;
const CODE_CLUSTER_COUNT_PF: u16 = 103;
const CODE_PHASING_BASE: u16 = 200;
const CODE_ALIGNED_BASE: u16 = 300;

/// One read's geometry, taken from `RunInfo.xml`.
#[derive(Clone, Debug)]
pub struct ReadGeometry {
    /// One-based read number.
    pub number: u32,

    /// Number of cycles in the read.
    pub num_cycles: u32,

    /// Whether the read is an index read.
    pub is_indexed: bool,
}

/// The thirteen summary metrics for one (read, lane) pair.
#[derive(Clone, Debug, Default)]
pub struct RunQuality {
    /// One-based read number.
    pub read: u32,

    /// One-based lane number.
    pub lane: u32,

    /// Percent of base calls at Q30 or above.
    pub percent_q30: Option<f64>,

    /// Mean raw cluster density across tiles (clusters/mm²).
    pub density: Option<f64>,

    /// Mean passing-filter cluster density across tiles.
    pub density_pf: Option<f64>,

    /// Total raw clusters across tiles.
    pub cluster_count: Option<f64>,

    /// Total passing-filter clusters across tiles.
    pub cluster_count_pf: Option<f64>,

    /// Mean PhiX error rate across tiles and cycles, if a control was run.
    pub error_rate: Option<f64>,

    /// Mean percent aligned to the control across tiles.
    pub percent_aligned: Option<f64>,

    /// Percent of clusters passing filter.
    pub percent_pf: Option<f64>,

    /// Mean phasing percentage across tiles.
    pub phasing: Option<f64>,

    /// Mean prephasing percentage across tiles.
    pub prephasing: Option<f64>,

    /// Total reads (raw clusters).
    pub reads: Option<f64>,

    /// Total reads passing filter.
    pub reads_pf: Option<f64>,

    /// Yield for the read in gigabases.
    pub yield_g: Option<f64>,
}

impl RunQuality {
    /// Flattens the row into a metric mapping, formatting values and leaving
    /// missing aggregates as nulls.
    pub fn as_map(&self) -> IndexMap<String, Option<String>> {
        fn fmt(value: Option<f64>) -> Option<String> {
            value.filter(|v| v.is_finite()).map(|v| format!("{}", v))
        }

        let mut map = IndexMap::new();
        map.insert(String::from("read"), Some(self.read.to_string()));
        map.insert(String::from("lane"), Some(self.lane.to_string()));
        map.insert(String::from("percent_q30"), fmt(self.percent_q30));
        map.insert(String::from("density"), fmt(self.density));
        map.insert(String::from("density_pf"), fmt(self.density_pf));
        map.insert(String::from("cluster_count"), fmt(self.cluster_count));
        map.insert(String::from("cluster_count_pf"), fmt(self.cluster_count_pf));
        map.insert(String::from("error_rate"), fmt(self.error_rate));
        map.insert(String::from("percent_aligned"), fmt(self.percent_aligned));
        map.insert(String::from("percent_pf"), fmt(self.percent_pf));
        map.insert(String::from("phasing"), fmt(self.phasing));
        map.insert(String::from("prephasing"), fmt(self.prephasing));
        map.insert(String::from("reads"), fmt(self.reads));
        map.insert(String::from("reads_pf"), fmt(self.reads_pf));
        map.insert(String::from("yield_g"), fmt(self.yield_g));
        map
    }
}

//=========================//
// Little-endian record IO //
//=========================//

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        if self.remaining() < n {
            bail!("truncated InterOp record");
        }

        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> anyhow::Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> anyhow::Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn f32(&mut self) -> anyhow::Result<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Running mean that reports `None` when it never saw a value.
#[derive(Clone, Copy, Default)]
struct Mean {
    sum: f64,
    n: u64,
}

impl Mean {
    fn push(&mut self, value: f64) {
        if value.is_finite() {
            self.sum += value;
            self.n += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        if self.n == 0 {
            None
        } else {
            Some(self.sum / self.n as f64)
        }
    }
}

//==============//
// Tile metrics //
//==============//

struct TileMetrics {
    /// (lane, code) → mean over tiles.
    means: IndexMap<(u16, u16), Mean>,

    /// (lane, code) → sum over tiles.
    sums: IndexMap<(u16, u16), f64>,
}

fn parse_tile_metrics(buf: &[u8]) -> anyhow::Result<TileMetrics> {
    let mut cursor = Cursor::new(buf);

    let version = cursor.u8().with_context(|| "tile metrics version byte")?;
    if version != 2 {
        bail!("unsupported TileMetricsOut.bin version: {}", version);
    }

    let record_size = cursor.u8()? as usize;
    if record_size != 10 {
        bail!("unexpected TileMetricsOut.bin record size: {}", record_size);
    }

    let mut metrics = TileMetrics {
        means: IndexMap::new(),
        sums: IndexMap::new(),
    };

    while cursor.remaining() >= record_size {
        let lane = cursor.u16()?;
        let _tile = cursor.u16()?;
        let code = cursor.u16()?;
        let value = cursor.f32()? as f64;

        metrics.means.entry((lane, code)).or_default().push(value);
        if value.is_finite() {
            *metrics.sums.entry((lane, code)).or_insert(0.0) += value;
        }
    }

    Ok(metrics)
}

impl TileMetrics {
    fn mean(&self, lane: u16, code: u16) -> Option<f64> {
        self.means.get(&(lane, code)).and_then(Mean::get)
    }

    fn sum(&self, lane: u16, code: u16) -> Option<f64> {
        self.sums.get(&(lane, code)).copied()
    }
}

//===========//
// Q metrics //
//===========//

/// Per-(lane, cycle) counts of base calls at Q30 or above, and in total.
struct QMetrics {
    q30: IndexMap<(u16, u16), f64>,
    total: IndexMap<(u16, u16), f64>,
}

fn parse_q_metrics(buf: &[u8]) -> anyhow::Result<QMetrics> {
    let mut cursor = Cursor::new(buf);

    let version = cursor.u8().with_context(|| "Q metrics version byte")?;
    let record_size = cursor.u8()? as usize;

    // The Q score represented by each histogram bucket. Unbinned files carry
    // fifty buckets for Q1..Q50; binned files declare their buckets up front.
    let bin_values: Vec<u8> = match version {
        4 => (1..=50).collect(),
        5 | 6 => {
            let binned = cursor.u8()? != 0;
            if !binned {
                (1..=50).collect()
            } else {
                let bin_count = cursor.u8()? as usize;
                for _ in 0..bin_count {
                    let _low = cursor.u8()?;
                }
                for _ in 0..bin_count {
                    let _high = cursor.u8()?;
                }
                let mut values = Vec::with_capacity(bin_count);
                for _ in 0..bin_count {
                    values.push(cursor.u8()?);
                }

                // Version 5 keeps fifty buckets per record and populates the
                // binned positions; version 6 shrinks the record to one
                // bucket per bin.
                if version == 5 {
                    let mut full = vec![0u8; 50];
                    for value in &values {
                        if (1..=50).contains(&usize::from(*value)) {
                            full[usize::from(*value) - 1] = *value;
                        }
                    }
                    full
                } else {
                    values
                }
            }
        }
        v => bail!("unsupported QMetricsOut.bin version: {}", v),
    };

    let mut metrics = QMetrics {
        q30: IndexMap::new(),
        total: IndexMap::new(),
    };

    while cursor.remaining() >= record_size {
        let lane = cursor.u16()?;
        let _tile = cursor.u16()?;
        let cycle = cursor.u16()?;

        for q in &bin_values {
            let count = cursor.u32()? as f64;

            *metrics.total.entry((lane, cycle)).or_insert(0.0) += count;
            if *q >= 30 {
                *metrics.q30.entry((lane, cycle)).or_insert(0.0) += count;
            }
        }
    }

    Ok(metrics)
}

//===============//
// Error metrics //
//===============//

/// Per-(lane, cycle) mean PhiX error rate.
struct ErrorMetrics {
    rates: IndexMap<(u16, u16), Mean>,
}

fn parse_error_metrics(buf: &[u8]) -> anyhow::Result<ErrorMetrics> {
    let mut cursor = Cursor::new(buf);

    let version = cursor.u8().with_context(|| "error metrics version byte")?;
    if version != 3 {
        bail!("unsupported ErrorMetricsOut.bin version: {}", version);
    }

    let record_size = cursor.u8()? as usize;
    if record_size != 30 {
        bail!("unexpected ErrorMetricsOut.bin record size: {}", record_size);
    }

    let mut metrics = ErrorMetrics {
        rates: IndexMap::new(),
    };

    while cursor.remaining() >= record_size {
        let lane = cursor.u16()?;
        let _tile = cursor.u16()?;
        let cycle = cursor.u16()?;
        let rate = cursor.f32()? as f64;
        for _ in 0..5 {
            let _counts = cursor.u32()?;
        }

        metrics.rates.entry((lane, cycle)).or_default().push(rate);
    }

    Ok(metrics)
}

//=============//
// Aggregation //
//=============//

/// Inclusive cycle range covered by each read, in read order.
fn cycle_ranges(reads: &[ReadGeometry]) -> Vec<(u32, u32, u32)> {
    let mut ranges = Vec::with_capacity(reads.len());
    let mut start = 1u32;

    for read in reads {
        let end = start + read.num_cycles - 1;
        ranges.push((read.number, start, end));
        start = end + 1;
    }

    ranges
}

/// Produces the run-quality summary for every (read, lane) pair.
///
/// `TileMetricsOut.bin` and `QMetricsOut.bin` must be present;
/// `ErrorMetricsOut.bin` is optional.
pub fn parse_interop_summary(
    run_dir: impl AsRef<Path>,
    reads: &[ReadGeometry],
    lane_count: u32,
) -> anyhow::Result<Vec<RunQuality>> {
    let interop_dir = run_dir.as_ref().join("InterOp");

    let tile_buf = std::fs::read(interop_dir.join("TileMetricsOut.bin"))
        .with_context(|| format!("reading {}", interop_dir.join("TileMetricsOut.bin").display()))?;
    let tile = parse_tile_metrics(&tile_buf)?;

    let q_buf = std::fs::read(interop_dir.join("QMetricsOut.bin"))
        .with_context(|| format!("reading {}", interop_dir.join("QMetricsOut.bin").display()))?;
    let q = parse_q_metrics(&q_buf)?;

    let error = match std::fs::read(interop_dir.join("ErrorMetricsOut.bin")) {
        Ok(buf) => Some(parse_error_metrics(&buf)?),
        Err(_) => None,
    };

    let ranges = cycle_ranges(reads);

    let mut rows = Vec::new();
    for (read_number, first_cycle, last_cycle) in &ranges {
        let read_index = *read_number as u16 - 1;

        for lane in 1..=lane_count as u16 {
            let mut row = RunQuality {
                read: *read_number,
                lane: u32::from(lane),
                ..RunQuality::default()
            };

            row.density = tile.mean(lane, CODE_DENSITY);
            row.density_pf = tile.mean(lane, CODE_DENSITY_PF);
            row.cluster_count = tile.sum(lane, CODE_CLUSTER_COUNT);
            row.cluster_count_pf = tile.sum(lane, CODE_CLUSTER_COUNT_PF);
            row.reads = row.cluster_count;
            row.reads_pf = row.cluster_count_pf;

            row.percent_pf = match (row.cluster_count_pf, row.cluster_count) {
                (Some(pf), Some(raw)) if raw > 0.0 => Some(pf / raw * 100.0),
                _ => None,
            };

            // Phasing values are stored as ratios per tile; the summary
            // reports percentages.
            row.phasing = tile
                .mean(lane, CODE_PHASING_BASE + read_index * 2)
                .map(|v| v * 100.0);
            row.prephasing = tile
                .mean(lane, CODE_PHASING_BASE + 1 + read_index * 2)
                .map(|v| v * 100.0);
            row.percent_aligned = tile.mean(lane, CODE_ALIGNED_BASE + read_index);

            let mut q30 = 0.0;
            let mut total = 0.0;
            let mut error_mean = Mean::default();
            for cycle in *first_cycle..=*last_cycle {
                let key = (lane, cycle as u16);
                q30 += q.q30.get(&key).copied().unwrap_or(0.0);
                total += q.total.get(&key).copied().unwrap_or(0.0);

                if let Some(error) = &error {
                    if let Some(rate) = error.rates.get(&key).and_then(Mean::get) {
                        error_mean.push(rate);
                    }
                }
            }

            row.percent_q30 = if total > 0.0 {
                Some(q30 / total * 100.0)
            } else {
                None
            };
            row.yield_g = if total > 0.0 {
                Some(total / 1e9)
            } else {
                None
            };
            row.error_rate = error_mean.get();

            rows.push(row);
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {

    use std::fs;

    use super::*;

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_f32(buf: &mut Vec<u8>, v: f32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn tile_record(buf: &mut Vec<u8>, lane: u16, tile: u16, code: u16, value: f32) {
        push_u16(buf, lane);
        push_u16(buf, tile);
        push_u16(buf, code);
        push_f32(buf, value);
    }

    fn write_fixture_run(dir: &Path) {
        let interop = dir.join("InterOp");
        fs::create_dir_all(&interop).unwrap();

        // TileMetricsOut v2: two tiles on lane 1.
        let mut tile = vec![2u8, 10u8];
        for (t, density, density_pf, cc, cc_pf) in
            [(1101u16, 1000.0f32, 900.0f32, 200.0f32, 180.0f32),
             (1102, 2000.0, 1700.0, 300.0, 270.0)]
        {
            tile_record(&mut tile, 1, t, CODE_DENSITY, density);
            tile_record(&mut tile, 1, t, CODE_DENSITY_PF, density_pf);
            tile_record(&mut tile, 1, t, CODE_CLUSTER_COUNT, cc);
            tile_record(&mut tile, 1, t, CODE_CLUSTER_COUNT_PF, cc_pf);
            // Read 1 phasing/prephasing.
            tile_record(&mut tile, 1, t, 200, 0.0012);
            tile_record(&mut tile, 1, t, 201, 0.0004);
            // Read 1 percent aligned.
            tile_record(&mut tile, 1, t, 300, 1.5);
        }
        fs::write(interop.join("TileMetricsOut.bin"), &tile).unwrap();

        // QMetricsOut v6, binned: three bins at Q10/Q25/Q35.
        let mut q = vec![6u8, 0u8, 1u8, 3u8];
        q.extend_from_slice(&[2, 20, 30]); // lower bounds
        q.extend_from_slice(&[19, 29, 45]); // upper bounds
        q.extend_from_slice(&[10, 25, 35]); // representative values
        let record_size = 6 + 3 * 4;
        q[1] = record_size as u8;
        for cycle in 1..=4u16 {
            push_u16(&mut q, 1);
            push_u16(&mut q, 1101);
            push_u16(&mut q, cycle);
            push_u32(&mut q, 100); // Q10
            push_u32(&mut q, 100); // Q25
            push_u32(&mut q, 300); // Q35
        }
        fs::write(interop.join("QMetricsOut.bin"), &q).unwrap();

        // ErrorMetricsOut v3: cycles 1-2 only (read 1).
        let mut e = vec![3u8, 30u8];
        for (cycle, rate) in [(1u16, 0.5f32), (2, 0.7)] {
            push_u16(&mut e, 1);
            push_u16(&mut e, 1101);
            push_u16(&mut e, cycle);
            push_f32(&mut e, rate);
            for _ in 0..5 {
                push_u32(&mut e, 0);
            }
        }
        fs::write(interop.join("ErrorMetricsOut.bin"), &e).unwrap();
    }

    fn geometry() -> Vec<ReadGeometry> {
        vec![
            ReadGeometry {
                number: 1,
                num_cycles: 2,
                is_indexed: false,
            },
            ReadGeometry {
                number: 2,
                num_cycles: 2,
                is_indexed: false,
            },
        ]
    }

    #[test]
    pub fn test_summary_aggregation() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture_run(dir.path());

        let rows = parse_interop_summary(dir.path(), &geometry(), 1).unwrap();
        assert_eq!(rows.len(), 2);

        let read1 = &rows[0];
        assert_eq!(read1.read, 1);
        assert_eq!(read1.lane, 1);
        assert_eq!(read1.density, Some(1500.0));
        assert_eq!(read1.density_pf, Some(1300.0));
        assert_eq!(read1.cluster_count, Some(500.0));
        assert_eq!(read1.cluster_count_pf, Some(450.0));
        assert_eq!(read1.percent_pf, Some(90.0));
        assert_eq!(read1.reads, Some(500.0));
        assert_eq!(read1.reads_pf, Some(450.0));

        // 300 of 500 calls per cycle are Q35.
        assert_eq!(read1.percent_q30, Some(60.0));

        // Phasing ratios are reported as percentages.
        assert!((read1.phasing.unwrap() - 0.12).abs() < 1e-9);
        assert!((read1.prephasing.unwrap() - 0.04).abs() < 1e-9);
        assert_eq!(read1.percent_aligned, Some(1.5));

        // Mean of 0.5 and 0.7.
        assert!((read1.error_rate.unwrap() - 0.6).abs() < 1e-6);

        // Read 2 has no error metrics: null, not zero.
        let read2 = &rows[1];
        assert_eq!(read2.error_rate, None);
        assert_eq!(read2.percent_q30, Some(60.0));
    }

    #[test]
    pub fn test_missing_error_metrics_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture_run(dir.path());
        fs::remove_file(dir.path().join("InterOp/ErrorMetricsOut.bin")).unwrap();

        let rows = parse_interop_summary(dir.path(), &geometry(), 1).unwrap();
        assert!(rows.iter().all(|r| r.error_rate.is_none()));
    }

    #[test]
    pub fn test_missing_tile_metrics_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(parse_interop_summary(dir.path(), &geometry(), 1).is_err());
    }

    #[test]
    pub fn test_unsupported_tile_version_is_an_error() {
        let buf = vec![9u8, 10u8];
        assert!(parse_tile_metrics(&buf).is_err());
    }

    #[test]
    pub fn test_q_metrics_unbinned_v4() {
        let mut q = vec![4u8, 206u8];
        push_u16(&mut q, 1);
        push_u16(&mut q, 1101);
        push_u16(&mut q, 1);
        for bucket in 1..=50u32 {
            // One call in Q20, two in Q30, rest empty.
            let count = match bucket {
                20 => 1,
                30 => 2,
                _ => 0,
            };
            push_u32(&mut q, count);
        }

        let metrics = parse_q_metrics(&q).unwrap();
        assert_eq!(metrics.total.get(&(1, 1)).copied(), Some(3.0));
        assert_eq!(metrics.q30.get(&(1, 1)).copied(), Some(2.0));
    }
}
