//! Pose annotations encoded in rendered-image filenames
//!
//! Synthetic renders are named
//! `<classhash>_<instancehash>_a<azimuth>_e<elevation>_t<tilt>_d<distance>.<ext>`,
//! e.g. `02691156_10155655850468db78d106ce0a280f87_a008_e-29_t012_d001.png`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Viewpoint of a rendered object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PoseAnnotation {
    /// Azimuth in degrees
    pub azimuth: i32,
    /// Elevation in degrees
    pub elevation: i32,
    /// In-plane rotation in degrees
    pub tilt: i32,
    /// Camera distance
    pub distance: i32,
}

impl PoseAnnotation {
    pub fn new(azimuth: i32, elevation: i32, tilt: i32, distance: i32) -> Self {
        Self {
            azimuth,
            elevation,
            tilt,
            distance,
        }
    }

    /// Build the filename a renderer would emit for this pose
    pub fn file_name(&self, class_hash: &str, instance_hash: &str, ext: &str) -> String {
        format!(
            "{}_{}_a{:03}_e{:03}_t{:03}_d{:03}.{}",
            class_hash, instance_hash, self.azimuth, self.elevation, self.tilt, self.distance, ext
        )
    }

    /// Fields in schema order
    pub fn as_array(&self) -> [i32; 4] {
        [self.azimuth, self.elevation, self.tilt, self.distance]
    }
}

const POSE_FIELDS: [(usize, char, &str); 4] = [
    (2, 'a', "azimuth"),
    (3, 'e', "elevation"),
    (4, 't', "tilt"),
    (5, 'd', "distance"),
];

/// Parse the pose fields out of a render filename
///
/// Accepts a bare filename or a path; only the final component is inspected.
pub fn parse_pose_annotation(file_name: &str) -> Result<PoseAnnotation> {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_name);

    let format_error = |reason: String| Error::FormatError {
        file: name.to_string(),
        reason,
    };

    let (stem, ext) = name
        .rsplit_once('.')
        .ok_or_else(|| format_error("missing file extension".to_string()))?;
    if ext.is_empty() {
        return Err(format_error("missing file extension".to_string()));
    }

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() != 6 {
        return Err(format_error(format!(
            "expected 6 underscore-delimited fields, found {}",
            parts.len()
        )));
    }
    if parts[0].is_empty() || parts[1].is_empty() {
        return Err(format_error("empty class or instance hash".to_string()));
    }

    let mut values = [0i32; 4];
    for (slot, (position, prefix, field)) in POSE_FIELDS.iter().enumerate() {
        let raw = parts[*position];
        let digits = raw
            .strip_prefix(*prefix)
            .ok_or_else(|| format_error(format!("{field} field '{raw}' must start with '{prefix}'")))?;
        values[slot] = digits
            .parse::<i32>()
            .map_err(|_| format_error(format!("{field} value '{digits}' is not an integer")))?;
    }

    Ok(PoseAnnotation::new(values[0], values[1], values[2], values[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_filename() {
        let pose = parse_pose_annotation(
            "02691156_10155655850468db78d106ce0a280f87_a008_e-29_t012_d001.png",
        )
        .unwrap();
        assert_eq!(pose, PoseAnnotation::new(8, -29, 12, 1));
    }

    #[test]
    fn test_parse_from_full_path() {
        let pose = parse_pose_annotation("/data/syn/plane/abc_def_a359_e090_t-05_d010.jpg").unwrap();
        assert_eq!(pose.as_array(), [359, 90, -5, 10]);
    }

    #[test]
    fn test_file_name_round_trip() {
        for pose in [
            PoseAnnotation::new(0, 0, 0, 0),
            PoseAnnotation::new(345, -89, 179, 3),
            PoseAnnotation::new(12, 45, -180, 12),
        ] {
            let name = pose.file_name("04379243", "ffe4383cff6d000a3628187d1bb97b92", "png");
            assert_eq!(parse_pose_annotation(&name).unwrap(), pose);
        }
    }

    #[test]
    fn test_missing_field_is_format_error() {
        let err = parse_pose_annotation("abc_def_a008_e010_t012.png").unwrap_err();
        assert!(matches!(err, Error::FormatError { .. }));
    }

    #[test]
    fn test_non_numeric_field_is_format_error() {
        let err = parse_pose_annotation("abc_def_a008_eXX_t012_d001.png").unwrap_err();
        match err {
            Error::FormatError { reason, .. } => assert!(reason.contains("elevation")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_prefix_is_format_error() {
        assert!(parse_pose_annotation("abc_def_x008_e010_t012_d001.png").is_err());
        assert!(parse_pose_annotation("abc_def_a008_e010_t012_d001").is_err());
    }
}
