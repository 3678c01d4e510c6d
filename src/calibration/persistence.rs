//! Plain-text persistence for the transformation chain.
//!
//! The file holds one 4x4 matrix per sensor in index order, row-major, four
//! space-separated values per line. No header, no version tag, no checksum.

use std::io::{BufRead, Write};

use glam::DMat4;

use crate::calibration::chain::TransformationChain;
use crate::error::{Error, Result};

/// Serialize the chain. Pure serialization, no well-formedness checks.
pub fn save_chain<W: Write>(chain: &TransformationChain, writer: &mut W) -> std::io::Result<()> {
    for pose in chain.poses() {
        // DMat4 is column-major; transpose so the flat array reads row-major.
        let rows = pose.transpose().to_cols_array();
        for r in 0..4 {
            writeln!(
                writer,
                "{} {} {} {}",
                rows[r * 4],
                rows[r * 4 + 1],
                rows[r * 4 + 2],
                rows[r * 4 + 3]
            )?;
        }
    }
    Ok(())
}

/// Parse exactly `sensor_count` matrices from the reader.
///
/// Builds into a temporary chain, so a caller's existing chain is only
/// replaced after a fully successful parse.
pub fn load_chain<R: BufRead>(reader: R, sensor_count: usize) -> Result<TransformationChain> {
    let mut values = Vec::with_capacity(sensor_count * 16);
    let needed = sensor_count * 16;

    for line in reader.lines() {
        let line = line?;
        for token in line.split_whitespace() {
            let value: f64 = token
                .parse()
                .map_err(|_| Error::Parse(format!("invalid number '{}'", token)))?;
            values.push(value);
        }
        if values.len() >= needed {
            break;
        }
    }

    if values.len() < needed {
        return Err(Error::Parse(format!(
            "expected {} values for {} matrices, found {}",
            needed,
            sensor_count,
            values.len()
        )));
    }

    let poses = values
        .chunks_exact(16)
        .take(sensor_count)
        .map(|chunk| {
            let mut row_major = [0.0f64; 16];
            row_major.copy_from_slice(chunk);
            DMat4::from_cols_array(&row_major).transpose()
        })
        .collect();

    Ok(TransformationChain::from_poses(poses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DQuat, DVec3};
    use std::io::{BufReader, Cursor};

    fn sample_chain() -> TransformationChain {
        let mut chain = TransformationChain::identity(3);
        chain.compose(0, DMat4::from_translation(DVec3::new(10.0, -2.5, 0.125)));
        chain.compose(
            1,
            DMat4::from_rotation_translation(
                DQuat::from_rotation_y(0.7),
                DVec3::new(0.0, 3.0, -40.0),
            ),
        );
        chain
    }

    #[test]
    fn test_save_load_round_trip() {
        let chain = sample_chain();
        let mut buffer = Vec::new();
        save_chain(&chain, &mut buffer).unwrap();

        let loaded = load_chain(Cursor::new(buffer), 3).unwrap();
        assert_eq!(loaded.len(), 3);
        for i in 0..3 {
            assert!(loaded.pose(i).abs_diff_eq(chain.pose(i), 1e-12));
        }
    }

    #[test]
    fn test_round_trip_through_file() {
        let chain = sample_chain();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.txt");

        let mut file = std::fs::File::create(&path).unwrap();
        save_chain(&chain, &mut file).unwrap();

        let file = BufReader::new(std::fs::File::open(&path).unwrap());
        let loaded = load_chain(file, 3).unwrap();
        assert!(loaded.pose(2).abs_diff_eq(chain.pose(2), 1e-12));
    }

    #[test]
    fn test_truncated_file_is_a_parse_error() {
        let chain = sample_chain();
        let mut buffer = Vec::new();
        save_chain(&chain, &mut buffer).unwrap();

        // 3 matrices on disk, 4 expected.
        let err = load_chain(Cursor::new(buffer), 4).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_garbage_token_is_a_parse_error() {
        let text = "1 0 0 zero\n0 1 0 0\n0 0 1 0\n0 0 0 1\n";
        let err = load_chain(Cursor::new(text), 1).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_failed_load_leaves_caller_chain_untouched() {
        let chain = sample_chain();
        let before = chain.clone();

        assert!(load_chain(Cursor::new("not a matrix"), 3).is_err());
        assert_eq!(chain, before);
    }
}
