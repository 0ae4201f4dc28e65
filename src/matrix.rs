//! Neighbor matrices: flattened `N×N` rows of neighbor indices.
//!
//! Row `i` lists, in ascending order starting at column 0, every `j`
//! accepted as a neighbor of point `i`. The remaining cells hold
//! [`SENTINEL`]. The row stride is always the point count of the query
//! that produced the matrix, never the capacity of a persistent buffer.

#[cfg(feature = "opencl")]
use crate::opencl::MappedRead;

/// Marks an unused trailing cell in a neighbor row.
pub const SENTINEL: i32 = -1;

/// A row that breaks one of the neighbor-matrix invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowViolation {
    /// Row `row` lists itself as a neighbor.
    SelfReference { row: usize, col: usize },
    /// A cell holds something other than a point index or the sentinel.
    OutOfRange { row: usize, col: usize, value: i32 },
    /// A valid entry follows a sentinel.
    GapAfterSentinel { row: usize, col: usize },
    /// Entries are not in strictly ascending scan order.
    NotAscending { row: usize, col: usize },
}

impl std::fmt::Display for RowViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfReference { row, col } => {
                write!(f, "row {row} lists itself at column {col}")
            }
            Self::OutOfRange { row, col, value } => {
                write!(f, "row {row} column {col} holds out-of-range value {value}")
            }
            Self::GapAfterSentinel { row, col } => {
                write!(f, "row {row} has a valid entry after a sentinel at column {col}")
            }
            Self::NotAscending { row, col } => {
                write!(f, "row {row} is not ascending at column {col}")
            }
        }
    }
}

impl std::error::Error for RowViolation {}

/// Read access shared by owned and borrowed neighbor matrices.
pub trait NeighborRows {
    /// Number of points (rows, and columns per row).
    fn point_count(&self) -> usize;

    /// All `N²` cells, row-major.
    fn cells(&self) -> &[i32];

    /// The `N` cells of row `i`.
    fn row(&self, i: usize) -> &[i32] {
        let n = self.point_count();
        &self.cells()[i * n..(i + 1) * n]
    }

    /// Neighbor indices of point `i`, in scan order.
    fn neighbors(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.row(i)
            .iter()
            .take_while(|&&c| c != SENTINEL)
            .map(|&c| c as usize)
    }

    /// Number of neighbors of point `i`.
    fn neighbor_count(&self, i: usize) -> usize {
        self.row(i).iter().take_while(|&&c| c != SENTINEL).count()
    }

    /// Check self-exclusion, compaction, and ascending order on every row.
    ///
    /// Cardinality `<= N - 1` follows: a strictly ascending row of indices
    /// in `0..N` that skips its own index cannot fill all `N` cells.
    fn check_invariants(&self) -> Result<(), RowViolation> {
        let n = self.point_count();
        for row in 0..n {
            let mut prev: Option<i32> = None;
            let mut seen_sentinel = false;
            for (col, &value) in self.row(row).iter().enumerate() {
                if value == SENTINEL {
                    seen_sentinel = true;
                    continue;
                }
                if value < 0 || value as usize >= n {
                    return Err(RowViolation::OutOfRange { row, col, value });
                }
                if seen_sentinel {
                    return Err(RowViolation::GapAfterSentinel { row, col });
                }
                if value as usize == row {
                    return Err(RowViolation::SelfReference { row, col });
                }
                if prev.is_some_and(|p| p >= value) {
                    return Err(RowViolation::NotAscending { row, col });
                }
                prev = Some(value);
            }
        }
        Ok(())
    }
}

/// An owned neighbor matrix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NeighborMatrix {
    n: usize,
    cells: Vec<i32>,
}

impl NeighborMatrix {
    /// An `n×n` matrix with every cell set to [`SENTINEL`].
    pub fn filled(n: usize) -> Self {
        Self {
            n,
            cells: vec![SENTINEL; n * n],
        }
    }

    /// Wrap existing cells. Returns `None` unless `cells.len() == n * n`.
    pub fn from_cells(n: usize, cells: Vec<i32>) -> Option<Self> {
        (cells.len() == n * n).then_some(Self { n, cells })
    }

    /// Wrap cells already known to hold `n * n` entries.
    pub(crate) fn from_square(n: usize, cells: Vec<i32>) -> Self {
        debug_assert_eq!(cells.len(), n * n);
        Self { n, cells }
    }

    /// Resize to `n×n`, keeping the allocation. Cell contents are unspecified.
    pub(crate) fn reshape(&mut self, n: usize) {
        self.n = n;
        self.cells.resize(n * n, SENTINEL);
    }

    pub fn cells_mut(&mut self) -> &mut [i32] {
        &mut self.cells
    }

    /// Borrow as a view.
    pub fn view(&self) -> NeighborView<'_> {
        NeighborView::borrowed(self.n, &self.cells)
    }
}

impl NeighborRows for NeighborMatrix {
    fn point_count(&self) -> usize {
        self.n
    }

    fn cells(&self) -> &[i32] {
        &self.cells
    }
}

enum Cells<'a> {
    Borrowed(&'a [i32]),
    #[cfg(feature = "opencl")]
    Mapped(MappedRead<'a, i32>),
}

/// A borrowed neighbor matrix.
///
/// Views returned by the persistent-buffer backends keep the device
/// output region mapped until they are dropped, and borrow the backend
/// mutably: the next query cannot start while a view is alive.
pub struct NeighborView<'a> {
    n: usize,
    cells: Cells<'a>,
}

impl<'a> NeighborView<'a> {
    pub fn borrowed(n: usize, cells: &'a [i32]) -> Self {
        debug_assert_eq!(cells.len(), n * n);
        Self {
            n,
            cells: Cells::Borrowed(cells),
        }
    }

    /// The view of a zero-point query.
    pub fn empty() -> Self {
        Self::borrowed(0, &[])
    }

    #[cfg(feature = "opencl")]
    pub(crate) fn mapped(n: usize, cells: MappedRead<'a, i32>) -> Self {
        debug_assert_eq!(cells.len(), n * n);
        Self {
            n,
            cells: Cells::Mapped(cells),
        }
    }

    /// Copy the cells out into an owned matrix.
    pub fn to_matrix(&self) -> NeighborMatrix {
        NeighborMatrix {
            n: self.n,
            cells: self.cells().to_vec(),
        }
    }
}

impl NeighborRows for NeighborView<'_> {
    fn point_count(&self) -> usize {
        self.n
    }

    fn cells(&self) -> &[i32] {
        match &self.cells {
            Cells::Borrowed(c) => *c,
            #[cfg(feature = "opencl")]
            Cells::Mapped(m) => m.as_slice(),
        }
    }
}

impl std::fmt::Debug for NeighborView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeighborView")
            .field("n", &self.n)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(n: usize, cells: &[i32]) -> NeighborMatrix {
        NeighborMatrix::from_cells(n, cells.to_vec()).unwrap()
    }

    #[test]
    fn test_filled_is_all_sentinel() {
        let m = NeighborMatrix::filled(3);
        assert_eq!(m.cells(), &[SENTINEL; 9]);
        assert_eq!(m.neighbor_count(1), 0);
        assert!(m.check_invariants().is_ok());
    }

    #[test]
    fn test_from_cells_rejects_wrong_length() {
        assert!(NeighborMatrix::from_cells(2, vec![-1; 3]).is_none());
        assert!(NeighborMatrix::from_cells(0, Vec::new()).is_some());
    }

    #[test]
    fn test_rows_and_neighbors() {
        let m = matrix(3, &[1, 2, -1, 0, -1, -1, -1, -1, -1]);
        assert_eq!(m.row(0), &[1, 2, -1]);
        assert_eq!(m.neighbors(0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(m.neighbors(1).collect::<Vec<_>>(), vec![0]);
        assert_eq!(m.neighbor_count(2), 0);
        assert!(m.check_invariants().is_ok());
    }

    #[test]
    fn test_invariant_self_reference() {
        let m = matrix(2, &[0, -1, -1, -1]);
        assert_eq!(
            m.check_invariants(),
            Err(RowViolation::SelfReference { row: 0, col: 0 })
        );
    }

    #[test]
    fn test_invariant_gap_after_sentinel() {
        let m = matrix(3, &[-1, 1, -1, -1, -1, -1, -1, -1, -1]);
        assert_eq!(
            m.check_invariants(),
            Err(RowViolation::GapAfterSentinel { row: 0, col: 1 })
        );
    }

    #[test]
    fn test_invariant_out_of_range_and_order() {
        let m = matrix(2, &[5, -1, -1, -1]);
        assert!(matches!(
            m.check_invariants(),
            Err(RowViolation::OutOfRange { value: 5, .. })
        ));

        let m = matrix(3, &[2, 1, -1, -1, -1, -1, -1, -1, -1]);
        assert_eq!(
            m.check_invariants(),
            Err(RowViolation::NotAscending { row: 0, col: 1 })
        );
    }

    #[test]
    fn test_view_matches_matrix() {
        let m = matrix(2, &[1, -1, 0, -1]);
        let v = m.view();
        assert_eq!(v.point_count(), 2);
        assert_eq!(v.cells(), m.cells());
        assert_eq!(v.to_matrix(), m);
    }

    #[test]
    fn test_empty_view() {
        let v = NeighborView::empty();
        assert_eq!(v.point_count(), 0);
        assert!(v.cells().is_empty());
        assert!(v.check_invariants().is_ok());
    }

    #[test]
    fn test_reshape_keeps_shape_consistent() {
        let mut m = NeighborMatrix::filled(4);
        m.reshape(2);
        assert_eq!(m.point_count(), 2);
        assert_eq!(m.cells().len(), 4);
        m.reshape(3);
        assert_eq!(m.cells().len(), 9);
    }
}
