use indextree::NodeId;

use crate::tree::FileTree;

/// Axis-aligned rectangle in terminal cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CellRect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl CellRect {
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u32 {
        self.width as u32 * self.height as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x as u32 + self.width as u32
    }

    pub fn bottom(&self) -> u32 {
        self.y as u32 + self.height as u32
    }

    pub fn contains(&self, x: u16, y: u16) -> bool {
        x >= self.x && (x as u32) < self.right() && y >= self.y && (y as u32) < self.bottom()
    }

    /// True when the interiors share at least one cell.
    pub fn intersects(&self, other: &CellRect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && (self.x as u32) < other.right()
            && (other.x as u32) < self.right()
            && (self.y as u32) < other.bottom()
            && (other.y as u32) < self.bottom()
    }
}

/// Item to be laid out in the treemap
#[derive(Debug, Clone, Copy)]
pub struct TreemapItem {
    pub size: u64,
    pub index: usize,
}

/// Result of the treemap layout calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRect {
    pub rect: CellRect,
    pub index: usize,
}

/// A laid-out child of the viewed directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub rect: CellRect,
    pub node: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    /// Row spans the width; rows stack downward.
    Horizontal,
    /// Column spans the height; columns stack rightward.
    Vertical,
}

impl Orientation {
    fn of(rect: CellRect) -> Self {
        if rect.width >= rect.height {
            Self::Horizontal
        } else {
            Self::Vertical
        }
    }

    /// (length along the row, breadth the rows stack across)
    fn axes(self, rect: CellRect) -> (u16, u16) {
        match self {
            Self::Horizontal => (rect.width, rect.height),
            Self::Vertical => (rect.height, rect.width),
        }
    }
}

/// Lay out the largest `max_items` children of `node` into the given cells.
///
/// Tiles come back in descending size order, which is also the order of
/// `FileTree::sorted_children`, so a numeric key can index straight into them.
pub fn layout(tree: &FileTree, node: NodeId, x: u16, y: u16, width: u16, height: u16, max_items: usize) -> Vec<Tile> {
    let container = CellRect::new(x, y, width, height);
    if container.is_empty() || max_items == 0 {
        return Vec::new();
    }

    let mut children = tree.sorted_children(node);
    children.truncate(max_items);

    let items: Vec<TreemapItem> = children
        .iter()
        .enumerate()
        .map(|(index, &child)| TreemapItem {
            size: tree.aggregate_size(child),
            index,
        })
        .collect();

    SquarifiedTreemap::layout(&items, container)
        .into_iter()
        .map(|placed| Tile {
            rect: placed.rect,
            node: children[placed.index],
        })
        .collect()
}

/// Squarified treemap over integer cells.
///
/// Rows are grown greedily while the worst aspect ratio does not get worse
/// (ties keep growing), then placed with floored lengths. Trailing cells left
/// by rounding stay empty.
pub struct SquarifiedTreemap;

impl SquarifiedTreemap {
    pub fn layout(items: &[TreemapItem], container: CellRect) -> Vec<LayoutRect> {
        // Keep every cell addressable in u16.
        let container = CellRect::new(
            container.x,
            container.y,
            container.width.min(u16::MAX - container.x),
            container.height.min(u16::MAX - container.y),
        );
        if items.is_empty() || container.is_empty() {
            return vec![];
        }

        let total_size: u128 = items.iter().map(|item| item.size as u128).sum();
        if total_size == 0 {
            return vec![];
        }

        let mut ordered = items.to_vec();
        // Stable: equal sizes keep the caller's order.
        ordered.sort_by(|a, b| b.size.cmp(&a.size));

        let mut result = Vec::with_capacity(ordered.len());
        Self::squarify(&ordered, total_size, container, &mut result);
        result
    }

    fn squarify(items: &[TreemapItem], total_size: u128, container: CellRect, result: &mut Vec<LayoutRect>) {
        let mut remaining = items;
        let mut remaining_size = total_size;
        let mut free = container;

        while !remaining.is_empty() {
            if remaining_size == 0 || free.is_empty() {
                // Nothing left to share: zero-area tiles keep every item accounted for.
                for item in remaining {
                    result.push(LayoutRect {
                        rect: CellRect::new(free.x, free.y, 0, 0),
                        index: item.index,
                    });
                }
                return;
            }

            let row_len = Self::grow_row(remaining, remaining_size, free);
            let (row, rest) = remaining.split_at(row_len);
            let row_size: u128 = row.iter().map(|item| item.size as u128).sum();

            // The final row, or one followed only by empty items, takes all
            // remaining breadth.
            let takes_rest = rest.is_empty() || row_size == remaining_size;
            free = Self::layout_row(row, row_size, remaining_size, takes_rest, free, result);
            remaining = rest;
            remaining_size -= row_size;
        }
    }

    /// Number of leading items that form the next row.
    fn grow_row(items: &[TreemapItem], remaining_size: u128, free: CellRect) -> usize {
        let orientation = Orientation::of(free);
        let (length, _) = orientation.axes(free);
        let scale = free.area() as f64 / remaining_size as f64;

        let first = items[0].size;
        let (mut sum, mut max, mut min) = (first as f64, first, first);
        let mut worst = Self::worst_aspect_ratio(sum, max, min, length, scale);
        let mut count = 1;

        while count < items.len() {
            let next = items[count].size;
            let candidate = Self::worst_aspect_ratio(sum + next as f64, max.max(next), min.min(next), length, scale);
            if candidate > worst {
                break;
            }
            sum += next as f64;
            max = max.max(next);
            min = min.min(next);
            worst = candidate;
            count += 1;
        }

        count
    }

    /// Worst max(w/h, h/w) over a row with the given size sum and extremes,
    /// laid along `length` cells where one size unit covers `scale` cells.
    fn worst_aspect_ratio(sum: f64, max: u64, min: u64, length: u16, scale: f64) -> f64 {
        if sum <= 0.0 || min == 0 || length == 0 {
            return f64::INFINITY;
        }

        let w = length as f64;
        let area = sum * scale;
        let aspect1 = (w * w * max as f64 * scale) / (area * area);
        let aspect2 = (area * area) / (w * w * min as f64 * scale);

        aspect1.max(aspect2)
    }

    /// Place one row and return the rectangle left for the following rows.
    fn layout_row(
        row: &[TreemapItem],
        row_size: u128,
        remaining_size: u128,
        takes_rest: bool,
        free: CellRect,
        result: &mut Vec<LayoutRect>,
    ) -> CellRect {
        let orientation = Orientation::of(free);
        let (length, breadth) = orientation.axes(free);

        let thickness = if takes_rest {
            breadth
        } else {
            // At least one cell, and leave one for the rows still to come.
            let share = (breadth as u128 * row_size + remaining_size / 2) / remaining_size;
            (share as u16).clamp(1, breadth.saturating_sub(1).max(1))
        };

        let mut offset = 0u16;
        for item in row {
            let item_length = if row_size == 0 {
                0
            } else {
                (length as u128 * item.size as u128 / row_size) as u16
            };

            let rect = match orientation {
                Orientation::Horizontal => CellRect::new(free.x.saturating_add(offset), free.y, item_length, thickness),
                Orientation::Vertical => CellRect::new(free.x, free.y.saturating_add(offset), thickness, item_length),
            };
            result.push(LayoutRect { rect, index: item.index });
            offset += item_length;
        }

        match orientation {
            Orientation::Horizontal => {
                CellRect::new(free.x, free.y.saturating_add(thickness), free.width, free.height - thickness)
            }
            Orientation::Vertical => {
                CellRect::new(free.x.saturating_add(thickness), free.y, free.width - thickness, free.height)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn items(sizes: &[u64]) -> Vec<TreemapItem> {
        sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| TreemapItem { size, index })
            .collect()
    }

    fn total_area(rects: &[LayoutRect]) -> u32 {
        rects.iter().map(|r| r.rect.area()).sum()
    }

    fn assert_valid(rects: &[LayoutRect], container: CellRect) {
        for (i, a) in rects.iter().enumerate() {
            if !a.rect.is_empty() {
                assert!(a.rect.x >= container.x && a.rect.right() <= container.right(), "{:?}", a);
                assert!(a.rect.y >= container.y && a.rect.bottom() <= container.bottom(), "{:?}", a);
            }
            for b in &rects[i + 1..] {
                assert!(!a.rect.intersects(&b.rect), "{:?} overlaps {:?}", a, b);
            }
        }
        assert!(total_area(rects) <= container.area());
    }

    /// root: fileA(100) fileB(300) subdir(600)
    fn scenario() -> (FileTree, NodeId, [NodeId; 3]) {
        let mut tree = FileTree::new("/r");
        let root = tree.root();
        let a = tree.add_child(root, "fileA", PathBuf::from("/r/fileA"), NodeKind::File { size: 100 });
        let b = tree.add_child(root, "fileB", PathBuf::from("/r/fileB"), NodeKind::File { size: 300 });
        let sub = tree.add_child(root, "subdir", PathBuf::from("/r/subdir"), NodeKind::Dir);
        tree.add_child(sub, "x", PathBuf::from("/r/subdir/x"), NodeKind::File { size: 600 });
        tree.mark_scanned(sub);
        tree.mark_scanned(root);
        (tree, root, [sub, b, a])
    }

    #[test]
    fn test_treemap_basic() {
        let container = CellRect::new(0, 0, 80, 60);
        let layout = SquarifiedTreemap::layout(&items(&[100, 200, 300]), container);

        assert_eq!(layout.len(), 3);
        assert_valid(&layout, container);
        let ratio = total_area(&layout) as f32 / container.area() as f32;
        assert!(ratio > 0.95, "Total area ratio {} should be close to 1.0", ratio);
    }

    #[test]
    fn test_scenario_two_files_one_directory() {
        let (tree, root, expected_order) = scenario();
        let tiles = layout(&tree, root, 0, 0, 40, 10, 10);

        assert_eq!(tiles.len(), 3);
        let nodes: Vec<NodeId> = tiles.iter().map(|t| t.node).collect();
        assert_eq!(nodes, expected_order.to_vec());

        let areas: Vec<u32> = tiles.iter().map(|t| t.rect.area()).collect();
        assert!(areas.iter().sum::<u32>() <= 400);
        // 600:300:100 of 400 cells
        assert!((areas[0] as i64 - 240).abs() <= 20, "{:?}", areas);
        assert!((areas[1] as i64 - 120).abs() <= 20, "{:?}", areas);
        assert!((areas[2] as i64 - 40).abs() <= 20, "{:?}", areas);

        for (i, a) in tiles.iter().enumerate() {
            for b in &tiles[i + 1..] {
                assert!(!a.rect.intersects(&b.rect));
            }
        }
    }

    #[test]
    fn test_empty_inputs() {
        let (tree, root, [sub, _, a]) = scenario();
        assert!(layout(&tree, root, 0, 0, 0, 5, 10).is_empty());
        assert!(layout(&tree, root, 0, 0, 5, 0, 10).is_empty());
        assert!(layout(&tree, root, 0, 0, 40, 10, 0).is_empty());
        assert!(layout(&tree, a, 0, 0, 40, 10, 10).is_empty());
        assert_eq!(layout(&tree, sub, 0, 0, 40, 10, 10).len(), 1);

        let mut tree = FileTree::new("/e");
        let root = tree.root();
        assert!(layout(&tree, root, 0, 0, 40, 10, 10).is_empty());

        let placeholder = tree.add_child(root, "p", PathBuf::from("/e/p"), NodeKind::Dir);
        assert!(layout(&tree, placeholder, 0, 0, 40, 10, 10).is_empty());
        // Root now has one child of size 0.
        assert!(layout(&tree, root, 0, 0, 40, 10, 10).is_empty());
    }

    #[test]
    fn test_truncates_to_max_items() {
        let (tree, root, [sub, b, _]) = scenario();
        let tiles = layout(&tree, root, 2, 3, 40, 10, 2);
        assert_eq!(tiles.iter().map(|t| t.node).collect::<Vec<_>>(), vec![sub, b]);
        let covered: u32 = tiles.iter().map(|t| t.rect.area()).sum();
        assert!(covered >= 380 && covered <= 400, "{}", covered);
        assert!(tiles.iter().all(|t| t.rect.x >= 2 && t.rect.y >= 3));
    }

    #[test]
    fn test_layout_is_deterministic() {
        let (tree, root, _) = scenario();
        let first = layout(&tree, root, 1, 1, 37, 13, 10);
        let second = layout(&tree, root, 1, 1, 37, 13, 10);
        assert_eq!(first, second);
    }

    #[test]
    fn test_tall_container_uses_columns() {
        let container = CellRect::new(0, 0, 10, 40);
        let layout = SquarifiedTreemap::layout(&items(&[600, 300, 100]), container);
        assert_valid(&layout, container);
        // Every tile in the first column starts at y offsets within the full height.
        assert_eq!(layout[0].rect.y, 0);
        assert_eq!(layout[0].rect.x, 0);
        assert!(layout[0].rect.height >= layout[0].rect.width);
    }

    #[test]
    fn test_many_items_split_into_rows() {
        let sizes: Vec<u64> = (1..=12).rev().map(|n| n * 100).collect();
        let container = CellRect::new(0, 0, 120, 40);
        let layout = SquarifiedTreemap::layout(&items(&sizes), container);

        assert_eq!(layout.len(), 12);
        assert_valid(&layout, container);
        let mut row_starts: Vec<u16> = layout.iter().map(|r| r.rect.y).collect();
        row_starts.dedup();
        assert!(row_starts.len() > 1);
        // Smallest item still gets a visible sliver.
        assert!(layout.iter().all(|r| r.rect.area() > 0));
        assert!(total_area(&layout) as f32 >= 0.85 * container.area() as f32);
    }

    #[test]
    fn test_zero_size_tail_gets_empty_tiles() {
        let container = CellRect::new(0, 0, 20, 10);
        let layout = SquarifiedTreemap::layout(&items(&[50, 0, 0]), container);
        assert_eq!(layout.len(), 3);
        assert_eq!(layout[0].rect, CellRect::new(0, 0, 20, 10));
        assert!(layout[1].rect.is_empty());
        assert!(layout[2].rect.is_empty());
    }

    #[test]
    fn test_equal_sizes_keep_input_order() {
        let container = CellRect::new(0, 0, 30, 30);
        let layout = SquarifiedTreemap::layout(&items(&[5, 5, 5, 5]), container);
        let order: Vec<usize> = layout.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_valid(&layout, container);
    }

    #[test]
    fn test_overflowing_container_does_not_pile_up() {
        let container = CellRect::new(u16::MAX - 10, 0, 100, 5);
        let layout = SquarifiedTreemap::layout(&items(&[5, 3, 2]), container);

        assert_eq!(layout.len(), 3);
        assert_valid(&layout, CellRect::new(u16::MAX - 10, 0, 10, 5));
        assert!(layout.iter().all(|r| r.rect.right() <= u16::MAX as u32));
    }

    #[test]
    fn test_cell_rect_contains() {
        let rect = CellRect::new(2, 3, 4, 2);
        assert!(rect.contains(2, 3));
        assert!(rect.contains(5, 4));
        assert!(!rect.contains(6, 4));
        assert!(!rect.contains(5, 5));
        assert!(!CellRect::new(0, 0, 0, 5).contains(0, 0));
    }

    proptest! {
        #[test]
        fn prop_layout_tiles_without_overlap(
            sizes in prop::collection::vec(1u64..1_000_000, 1..30),
            x in 0u16..50,
            y in 0u16..50,
            width in 1u16..200,
            height in 1u16..80,
        ) {
            let container = CellRect::new(x, y, width, height);
            let first = SquarifiedTreemap::layout(&items(&sizes), container);
            let second = SquarifiedTreemap::layout(&items(&sizes), container);

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.len(), sizes.len());
            assert_valid(&first, container);
        }

        #[test]
        fn prop_rounding_slack_stays_small(
            sizes in prop::collection::vec(1u64..1_000_000, 1..30),
            width in 1u16..200,
            height in 1u16..80,
        ) {
            let container = CellRect::new(0, 0, width, height);
            let layout = SquarifiedTreemap::layout(&items(&sizes), container);
            let slack = container.area() - total_area(&layout);

            // Flooring loses under one cell of length per item, across the
            // thickness of its row; a tile's longer side is at least that.
            let per_tile: u32 = layout.iter().map(|r| r.rect.width.max(r.rect.height) as u32).sum();
            prop_assert!(slack <= per_tile, "slack {} > {}", slack, per_tile);
            prop_assert!(slack <= sizes.len() as u32 * width.max(height) as u32);
        }

        #[test]
        fn prop_container_at_the_edge_is_clipped(
            sizes in prop::collection::vec(1u64..1_000, 1..12),
            x in (u16::MAX - 100)..=u16::MAX,
            y in (u16::MAX - 100)..=u16::MAX,
            width in 1u16..300,
            height in 1u16..300,
        ) {
            let clipped = CellRect::new(x, y, width.min(u16::MAX - x), height.min(u16::MAX - y));
            let layout = SquarifiedTreemap::layout(&items(&sizes), CellRect::new(x, y, width, height));
            if clipped.is_empty() {
                prop_assert!(layout.is_empty());
            } else {
                assert_valid(&layout, clipped);
            }
        }

        #[test]
        fn prop_single_item_fills_container(
            size in 1u64..u64::MAX / 2,
            width in 1u16..300,
            height in 1u16..300,
        ) {
            let container = CellRect::new(0, 0, width, height);
            let layout = SquarifiedTreemap::layout(&items(&[size]), container);
            prop_assert_eq!(layout.len(), 1);
            prop_assert_eq!(layout[0].rect, container);
        }
    }
}
