//! Points and point-file loading.
//!
//! A point file holds one point per line: three numeric fields separated
//! by a single delimiter, read as `f32` in `x, y, z` order. There is no
//! header row. A directory of such files is a sequence of frames.

use crate::{NbError, NbResult};

use std::fs;
use std::path::{Path, PathBuf};

/// A point in 3-D space.
///
/// The layout matches `point3_t` in `kernels/neighbors.cl` exactly
/// (three packed floats, 12 bytes), so slices of `Point` are uploaded
/// to the device without conversion.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<[f32; 3]> for Point {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Parse point text.
///
/// Blank lines are skipped. Line numbers in errors are 1-based.
pub fn parse_points(text: &str, delimiter: char) -> NbResult<Vec<Point>> {
    let mut points = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let mut coords = [0.0f32; 3];
        let mut fields = line.split(delimiter);
        for (axis, slot) in coords.iter_mut().enumerate() {
            let field = fields.next().ok_or_else(|| NbError::Parse {
                line: idx + 1,
                message: format!("expected 3 fields, found {axis}"),
            })?;
            *slot = field.trim().parse::<f32>().map_err(|e| NbError::Parse {
                line: idx + 1,
                message: format!("'{}': {e}", field.trim()),
            })?;
        }
        if fields.next().is_some() {
            return Err(NbError::Parse {
                line: idx + 1,
                message: "expected 3 fields, found more".to_string(),
            });
        }
        points.push(Point::from(coords));
    }
    Ok(points)
}

/// Load one point file.
pub fn load_points(path: &Path, delimiter: char) -> NbResult<Vec<Point>> {
    let text = fs::read_to_string(path).map_err(|e| NbError::Io {
        path: path.to_path_buf(),
        kind: e.kind(),
    })?;
    let points = parse_points(&text, delimiter).map_err(|e| match e {
        NbError::Parse { line, message } => NbError::Parse {
            line,
            message: format!("{}: {message}", path.display()),
        },
        other => other,
    })?;
    log::debug!("loaded {} points from {}", points.len(), path.display());
    Ok(points)
}

/// List the files in `dir` with extension `ext`, sorted by file name.
pub fn frame_files(dir: &Path, ext: &str) -> NbResult<Vec<PathBuf>> {
    let io_err = |e: std::io::Error| NbError::Io {
        path: dir.to_path_buf(),
        kind: e.kind(),
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load every frame file in `dir`, in file-name order.
pub fn load_frames(dir: &Path, ext: &str, delimiter: char) -> NbResult<Vec<Vec<Point>>> {
    frame_files(dir, ext)?
        .iter()
        .map(|path| load_points(path, delimiter))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_layout_matches_kernel() {
        assert_eq!(std::mem::size_of::<Point>(), 12);
        assert_eq!(std::mem::align_of::<Point>(), 4);
    }

    #[test]
    fn test_parse_points_basic() {
        let pts = parse_points("1,2,3\n-4.5,0,1e2\n", ',').unwrap();
        assert_eq!(
            pts,
            vec![Point::new(1.0, 2.0, 3.0), Point::new(-4.5, 0.0, 100.0)]
        );
    }

    #[test]
    fn test_parse_points_skips_blank_lines_and_crlf() {
        let pts = parse_points("1;2;3\r\n\r\n4;5;6\r\n", ';').unwrap();
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[1], Point::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_parse_points_empty() {
        assert!(parse_points("", ',').unwrap().is_empty());
    }

    #[test]
    fn test_parse_points_bad_field() {
        match parse_points("1,2,3\n1,x,3\n", ',') {
            Err(NbError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_points_wrong_field_count() {
        assert!(matches!(
            parse_points("1,2\n", ','),
            Err(NbError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            parse_points("1,2,3,4\n", ','),
            Err(NbError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_load_points_missing_file() {
        let err = load_points(Path::new("/nonexistent/points.csv"), ',').unwrap_err();
        assert!(matches!(err, NbError::Io { .. }));
    }

    #[test]
    fn test_load_frames_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.csv"), "2,2,2\n").unwrap();
        fs::write(dir.path().join("a.csv"), "1,1,1\n1,1,2\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let frames = load_frames(dir.path(), "csv", ',').unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 2);
        assert_eq!(frames[1], vec![Point::new(2.0, 2.0, 2.0)]);
    }
}
