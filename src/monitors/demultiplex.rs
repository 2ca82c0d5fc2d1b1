//! Demultiplexing checkers for bcl2fastq (`IlluminaQc`) and Dragen/BCLConvert
//! (`DragenQc`) output.
//!
//! Both flavours decide validity the same way: every non-NTC sample must have
//! exactly one fastq per lane and read, and each of those fastqs must reach a
//! minimum size — an empty or truncated fastq fails validity even though the
//! file is present. No-template controls are exempt from the size rule since
//! a clean NTC legitimately produces next to no reads. The flavours differ on
//! completion: `IlluminaQc` checks completion markers independently of
//! validity, while `DragenQc` folds the two together (complete ⇔ valid).

use std::path::PathBuf;

use tracing::debug;

use crate::config::Setting;
use crate::utils::globs;
use crate::utils::text::is_ntc;

/// Which demultiplexer produced the fastq tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemultiplexFlavor {
    /// bcl2fastq on the instrument or a head node.
    Illumina,

    /// Dragen BCLConvert; completion and validity are one judgement.
    Dragen,
}

impl DemultiplexFlavor {
    /// Marker files, relative to the run directory, that signal
    /// demultiplexing has finished.
    fn completed_markers(&self) -> &'static [&'static str] {
        match self {
            DemultiplexFlavor::Illumina => &["RTAComplete.txt"],
            DemultiplexFlavor::Dragen => &["RTAComplete.txt", "Logs/FastqComplete.txt"],
        }
    }

    /// Default fastq directory relative to the run directory.
    pub fn default_fastq_dir(&self) -> &'static str {
        match self {
            DemultiplexFlavor::Illumina => "Data/Intensities/BaseCalls",
            DemultiplexFlavor::Dragen => "Fastqs",
        }
    }
}

/// Completion and validity checks for a run's demultiplexing output.
pub struct DemultiplexChecker {
    flavor: DemultiplexFlavor,
    run_dir: PathBuf,
    fastq_dir: PathBuf,
    samples: Vec<String>,
    lane_count: u32,
    read_numbers: Vec<u32>,
    min_fastq_size: Setting<u64>,
}

impl DemultiplexChecker {
    /// Creates a checker for a run directory.
    ///
    /// `read_numbers` are the sequencing (non-index) read numbers as they
    /// appear in fastq filenames (`R1`, `R2`, …).
    pub fn new(
        flavor: DemultiplexFlavor,
        run_dir: impl Into<PathBuf>,
        samples: Vec<String>,
        lane_count: u32,
        read_numbers: Vec<u32>,
        min_fastq_size: Setting<u64>,
    ) -> Self {
        let run_dir = run_dir.into();
        let fastq_dir = run_dir.join(flavor.default_fastq_dir());

        DemultiplexChecker {
            flavor,
            run_dir,
            fastq_dir,
            samples,
            lane_count,
            read_numbers,
            min_fastq_size,
        }
    }

    fn markers_present(&self) -> bool {
        self.flavor
            .completed_markers()
            .iter()
            .all(|marker| self.run_dir.join(marker).exists())
    }

    /// Whether one sample's fastqs are all present, unambiguous and large
    /// enough. NTC samples pass unconditionally.
    pub fn sample_is_valid(&self, sample: &str) -> anyhow::Result<bool> {
        if is_ntc(sample) {
            return Ok(true);
        }

        for lane in 1..=self.lane_count {
            for read in &self.read_numbers {
                let pattern = format!("{}_S*_L{:03}_R{}_001.fastq.gz", sample, lane, read);
                let matches = globs::matches_in(&self.fastq_dir, &pattern)?;

                if matches.len() != 1 {
                    return Ok(false);
                }

                let size = std::fs::metadata(&matches[0])?.len();
                if size < *self.min_fastq_size.value() {
                    debug!(
                        "{} is {} bytes, below the {} byte minimum",
                        matches[0].display(),
                        size,
                        self.min_fastq_size.value()
                    );
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    fn all_samples_valid(&self) -> anyhow::Result<bool> {
        for sample in &self.samples {
            if !self.sample_is_valid(sample)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Whether demultiplexing has completed. For Dragen this folds in
    /// validity: an output tree with undersized fastqs is not complete.
    pub fn is_complete(&self) -> anyhow::Result<bool> {
        match self.flavor {
            DemultiplexFlavor::Illumina => Ok(self.markers_present()),
            DemultiplexFlavor::Dragen => {
                Ok(self.markers_present() && self.all_samples_valid()?)
            }
        }
    }

    /// Whether the demultiplexing output passes validity checks.
    pub fn is_valid(&self) -> anyhow::Result<bool> {
        match self.flavor {
            DemultiplexFlavor::Illumina => self.all_samples_valid(),
            DemultiplexFlavor::Dragen => self.is_complete(),
        }
    }
}
