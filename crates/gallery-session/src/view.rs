//! In-memory view of the open folder: one cell per image

use folder_cache::{FolderRecord, Rating};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CellState {
    /// Placeholder shown until the thumbnail is known to exist
    Loading,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cell {
    pub name: String,
    pub rating: Option<Rating>,
    pub state: CellState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SortMode {
    /// Folder listing order
    #[default]
    Listing,
    /// Highest rating first, unrated last, ties in listing order
    RatingDesc,
}

#[derive(Debug, Clone)]
pub struct GalleryView {
    folder: PathBuf,
    cells: Vec<Cell>,
    positions: HashMap<String, usize>,
    sort: SortMode,
}

impl GalleryView {
    /// Every cell starts out `Loading`, cached or not
    pub fn from_record(record: &FolderRecord) -> Self {
        let cells: Vec<Cell> = record
            .images
            .values()
            .map(|img| Cell {
                name: img.name.clone(),
                rating: img.rating,
                state: CellState::Loading,
            })
            .collect();
        let positions = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| (cell.name.clone(), i))
            .collect();
        Self {
            folder: record.path.clone(),
            cells,
            positions,
            sort: SortMode::Listing,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn cell(&self, name: &str) -> Option<&Cell> {
        self.positions.get(name).map(|&i| &self.cells[i])
    }

    fn cell_mut(&mut self, name: &str) -> Option<&mut Cell> {
        self.positions.get(name).map(|&i| &mut self.cells[i])
    }

    /// Mark a cell ready. Returns true only if its state changed.
    pub fn mark_ready(&mut self, name: &str) -> bool {
        match self.cell_mut(name) {
            Some(cell) if cell.state != CellState::Ready => {
                cell.state = CellState::Ready;
                true
            }
            _ => false,
        }
    }

    pub fn mark_loading(&mut self, name: &str) {
        if let Some(cell) = self.cell_mut(name) {
            cell.state = CellState::Loading;
        }
    }

    pub fn set_rating(&mut self, name: &str, rating: Option<Rating>) {
        if let Some(cell) = self.cell_mut(name) {
            cell.rating = rating;
        }
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort
    }

    pub fn set_sort(&mut self, sort: SortMode) {
        self.sort = sort;
    }

    /// Names of cells still waiting for a thumbnail, in listing order
    pub fn loading(&self) -> Vec<String> {
        self.cells
            .iter()
            .filter(|c| c.state == CellState::Loading)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn ready_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| c.state == CellState::Ready)
            .count()
    }

    /// Cells in display order for the current sort mode
    pub fn ordered(&self) -> Vec<&Cell> {
        let mut cells: Vec<&Cell> = self.cells.iter().collect();
        if self.sort == SortMode::RatingDesc {
            // Stable sort keeps listing order among equal keys
            cells.sort_by_key(|c| (c.rating.is_none(), Reverse(c.rating)));
        }
        cells
    }

    pub fn ordered_names(&self) -> Vec<String> {
        self.ordered().into_iter().map(|c| c.name.clone()).collect()
    }

    /// Display order chopped into rows of `columns`, the last row padded
    /// with `None`
    pub fn grid(&self, columns: usize) -> Vec<Vec<Option<&str>>> {
        if columns == 0 {
            return Vec::new();
        }
        let ordered = self.ordered();
        ordered
            .chunks(columns)
            .map(|row| {
                let mut names: Vec<Option<&str>> =
                    row.iter().map(|&c| Some(c.name.as_str())).collect();
                names.resize(columns, None);
                names
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folder_cache::ImageRecord;

    // Builds a record without touching the filesystem
    fn record(images: &[(&str, Option<i64>)]) -> FolderRecord {
        let json = serde_json::json!({
            "path": "/photos",
            "id": "0123456789abcdef0123456789abcdef",
            "cache_dir": "/cache/0123",
            "backup_dir": "/cache/0123_backup",
            "created_at": "2024-05-01T12:00:00Z",
            "images": {},
        });
        let mut record: FolderRecord = serde_json::from_value(json).unwrap();
        for (name, rating) in images {
            record.images.insert(
                name.to_string(),
                ImageRecord {
                    name: name.to_string(),
                    rating: rating.map(|r| Rating::new(r).unwrap()),
                },
            );
        }
        record
    }

    #[test]
    fn test_cells_start_loading() {
        let view = GalleryView::from_record(&record(&[("a.jpg", None), ("b.jpg", Some(2))]));
        assert_eq!(view.len(), 2);
        assert_eq!(view.loading(), vec!["a.jpg", "b.jpg"]);
        assert_eq!(view.cell("b.jpg").unwrap().rating, Some(Rating::new(2).unwrap()));
        assert_eq!(view.folder(), Path::new("/photos"));
    }

    #[test]
    fn test_mark_ready_is_idempotent() {
        let mut view = GalleryView::from_record(&record(&[("a.jpg", None)]));
        assert!(view.mark_ready("a.jpg"));
        let after_first = view.cell("a.jpg").cloned();
        assert!(!view.mark_ready("a.jpg"));
        assert_eq!(view.cell("a.jpg").cloned(), after_first);
        assert!(!view.mark_ready("unknown.jpg"));
        assert_eq!(view.ready_count(), 1);
    }

    #[test]
    fn test_rating_sort_unrated_last_and_stable() {
        let mut view = GalleryView::from_record(&record(&[
            ("a.jpg", None),
            ("b.jpg", Some(1)),
            ("c.jpg", Some(-1)),
            ("d.jpg", Some(3)),
            ("e.jpg", None),
            ("f.jpg", Some(1)),
            ("g.jpg", Some(0)),
        ]));
        assert_eq!(
            view.ordered_names(),
            vec!["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg", "f.jpg", "g.jpg"]
        );

        view.set_sort(SortMode::RatingDesc);
        assert_eq!(
            view.ordered_names(),
            vec!["d.jpg", "b.jpg", "f.jpg", "g.jpg", "c.jpg", "a.jpg", "e.jpg"]
        );

        view.set_sort(SortMode::Listing);
        assert_eq!(view.ordered_names()[0], "a.jpg");
    }

    #[test]
    fn test_grid_pads_last_row() {
        let view = GalleryView::from_record(&record(&[
            ("a.jpg", None),
            ("b.jpg", None),
            ("c.jpg", None),
        ]));
        assert_eq!(
            view.grid(2),
            vec![vec![Some("a.jpg"), Some("b.jpg")], vec![Some("c.jpg"), None]]
        );
        assert!(view.grid(0).is_empty());
    }
}
