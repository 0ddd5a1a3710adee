use dsv_core::{is_valid_delimiter, Newline, ScannerBuilder};

use crate::streamer::SkipEmptyLines;

/// How many rows the detector probes per candidate.
const PROBE_ROWS: usize = 10;

/// The default candidate delimiters, in preference order.
pub(crate) fn default_candidates() -> Vec<String> {
    vec![
        ",".to_string(),
        "\t".to_string(),
        "|".to_string(),
        ";".to_string(),
        dsv_core::RECORD_SEPARATOR.to_string(),
        dsv_core::UNIT_SEPARATOR.to_string(),
    ]
}

/// Choose a delimiter from `candidates` by probing a leading `sample` of the
/// input.
///
/// Each candidate scans up to [`PROBE_ROWS`] rows (comment lines excluded,
/// empty lines excluded when `skip_empty_lines` says so) and is scored by
/// the mean absolute deviation of its field counts, with the average field
/// count and candidate order as tie breakers. A candidate is viable only if
/// some probed row split into more than one field; `None` means nothing was
/// viable and the caller should fall back to its default.
///
/// `sample_complete` says whether `sample` is the whole input; when it is
/// not, a possibly-truncated final row is left out of the probe.
pub(crate) fn guess_delimiter(
    sample: &str,
    newline: Newline,
    skip_empty_lines: SkipEmptyLines,
    comment: Option<&str>,
    candidates: &[String],
    sample_complete: bool,
) -> Option<String> {
    let mut best: Option<(f64, f64, usize)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        if !is_valid_delimiter(candidate) {
            continue;
        }
        let mut scanner = ScannerBuilder::new()
            .delimiter(candidate)
            .newline(newline)
            .comment(comment)
            .row_limit(Some(PROBE_ROWS))
            .build();
        let scan = scanner.scan(sample, 0, !sample_complete);

        let counts: Vec<usize> = scan
            .rows
            .iter()
            .filter(|fields| !skip_empty_lines.skips(fields))
            .map(|fields| fields.len())
            .collect();
        if !counts.iter().any(|&count| count > 1) {
            continue;
        }
        let total: usize = counts.iter().sum();
        let average = total as f64 / counts.len() as f64;
        let deviation = counts
            .iter()
            .map(|&count| (count as f64 - average).abs())
            .sum::<f64>()
            / counts.len() as f64;

        let better = match best {
            None => true,
            Some((best_dev, best_avg, _)) => {
                deviation < best_dev
                    || (deviation == best_dev && average > best_avg)
            }
        };
        if better {
            best = Some((deviation, average, index));
        }
    }
    best.map(|(_, _, index)| candidates[index].clone())
}
