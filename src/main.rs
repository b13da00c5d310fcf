use clap::Parser;
use diskmap::config::Config;
use diskmap::crawler::{FileCrawler, ScanOptions};
use diskmap::format::{format_size, percent_of, truncate_label};
use diskmap::logging::{init_logging, LogTarget};
use diskmap::snapshot::ScanCache;
use diskmap::tree::FileTree;
use diskmap::treemap::{layout, Tile};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Symbols painted into treemap tiles, one per listed child.
const TILE_KEYS: &[u8] = b"123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Parser)]
#[command(name = "diskmap")]
#[command(about = "Show where the bytes under a directory go")]
#[command(version)]
struct Cli {
    /// Directory to analyze
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Leave directories deeper than this unscanned
    #[arg(short, long)]
    depth: Option<usize>,

    /// Number of children to list and draw (default: display.max_items)
    #[arg(short, long)]
    top: Option<usize>,

    /// Treemap width in characters
    #[arg(long, default_value_t = 80)]
    width: u16,

    /// Treemap height in characters
    #[arg(long, default_value_t = 20)]
    height: u16,

    /// Always scan, and do not store the result
    #[arg(long)]
    no_cache: bool,

    /// Config file (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rows in the extension breakdown (default: display.max_extensions)
    #[arg(short, long)]
    extensions: Option<usize>,
}

fn main() -> diskmap::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.logging, LogTarget::Stderr)?;

    let root = cli.path.canonicalize()?;
    let mut options = config.scan_options();
    if cli.depth.is_some() {
        options.max_depth = cli.depth;
    }

    let cache = (config.cache.enabled && !cli.no_cache)
        .then(|| ScanCache::from_config(&config.cache))
        .and_then(|cache| cache.map_err(|e| warn!("cache disabled: {}", e)).ok());

    let tree = load_or_scan(&root, options, cache.as_ref());

    let top = cli.top.unwrap_or(config.display.max_items);
    let extensions = cli.extensions.unwrap_or(config.display.max_extensions);

    let mut out = io::stdout().lock();
    write_report(&mut out, &tree, top, extensions, cli.width, cli.height)?;
    Ok(())
}

fn load_or_scan(root: &Path, options: ScanOptions, cache: Option<&ScanCache>) -> FileTree {
    if let Some(cache) = cache {
        match cache.load(root, &options) {
            Ok(Some(tree)) => {
                info!("using cached snapshot of {}", root.display());
                return tree;
            }
            Ok(None) => {}
            Err(err) => warn!("ignoring cached snapshot: {}", err),
        }
    }

    let mut crawler = FileCrawler::new(options.clone());
    let (tree, stats) = crawler.scan_with_progress(root, None);
    if stats.skipped_symlinks > 0 || stats.unreadable_dirs > 0 {
        info!(
            symlinks = stats.skipped_symlinks,
            unreadable = stats.unreadable_dirs,
            "some entries were not counted"
        );
    }

    if let Some(cache) = cache {
        if let Err(err) = cache.save(&tree, &options) {
            warn!("could not store snapshot: {}", err);
        }
    }
    tree
}

fn write_report(
    out: &mut impl Write,
    tree: &FileTree,
    top: usize,
    extensions: usize,
    width: u16,
    height: u16,
) -> io::Result<()> {
    let root = tree.root();
    let total = tree.total_size();

    writeln!(
        out,
        "{}  {}  {} files",
        tree.root_path().display(),
        format_size(total),
        tree.file_count(root)
    )?;
    writeln!(out)?;

    let children = tree.sorted_children(root);
    if children.is_empty() {
        writeln!(out, "(empty)")?;
        return Ok(());
    }

    writeln!(out, "Largest entries:")?;
    for (i, &child) in children.iter().take(top).enumerate() {
        let Some(entry) = tree.get(child) else {
            continue;
        };
        let size = tree.aggregate_size(child);
        let key = TILE_KEYS.get(i).map(|&b| b as char).unwrap_or(' ');
        let mut name = entry.name.clone();
        if entry.is_dir() {
            name.push('/');
        }
        let note = if entry.is_scanned() { "" } else { "  (not scanned)" };
        writeln!(
            out,
            "  [{}] {:<32} {:>10} {:>6.1}%{}",
            key,
            truncate_label(&name, 32),
            format_size(size),
            percent_of(size, total),
            note
        )?;
    }
    if children.len() > top {
        let rest: u64 = children[top..].iter().map(|&c| tree.aggregate_size(c)).sum();
        writeln!(
            out,
            "      {:<32} {:>10} {:>6.1}%",
            format!("({} more)", children.len() - top),
            format_size(rest),
            percent_of(rest, total)
        )?;
    }

    let stats = tree.extension_stats(root);
    let ranked = stats.ranked(extensions);
    if !ranked.is_empty() {
        writeln!(out)?;
        writeln!(out, "Extensions:")?;
        for row in ranked {
            writeln!(
                out,
                "  {:<12} {:>10} {:>6.1}%  {} files",
                truncate_label(&row.extension, 12),
                format_size(row.total_size),
                row.percent_by_size,
                row.count
            )?;
        }
    }

    let risk = stats.risk_summary();
    if !risk.findings.is_empty() {
        writeln!(out)?;
        writeln!(out, "Risk:")?;
        for finding in &risk.findings {
            writeln!(out, "  {}", finding)?;
        }
        for advice in risk.recommendations() {
            writeln!(out, "  - {}", advice)?;
        }
    }

    let tiles = layout(tree, root, 0, 0, width, height, top.min(TILE_KEYS.len()));
    if !tiles.is_empty() {
        writeln!(out)?;
        for line in render_grid(&tiles, width, height) {
            writeln!(out, "{}", line)?;
        }
    }
    Ok(())
}

/// Paint each tile with its key; cells no tile covers stay blank.
fn render_grid(tiles: &[Tile], width: u16, height: u16) -> Vec<String> {
    let mut grid = vec![vec![' '; width as usize]; height as usize];
    for (i, tile) in tiles.iter().enumerate() {
        let key = TILE_KEYS.get(i).map(|&b| b as char).unwrap_or('?');
        let rect = tile.rect;
        for y in rect.y..rect.y.saturating_add(rect.height).min(height) {
            for x in rect.x..rect.x.saturating_add(rect.width).min(width) {
                grid[y as usize][x as usize] = key;
            }
        }
    }
    grid.into_iter().map(|row| row.into_iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use diskmap::tree::NodeKind;

    fn sample_tree() -> FileTree {
        let mut tree = FileTree::new("/r");
        let root = tree.root();
        let d = tree.add_child(root, "d", PathBuf::from("/r/d"), NodeKind::Dir);
        tree.add_child(d, "x.bin", PathBuf::from("/r/d/x.bin"), NodeKind::File { size: 600 });
        tree.add_child(root, "a.txt", PathBuf::from("/r/a.txt"), NodeKind::File { size: 300 });
        tree.add_child(root, "b.txt", PathBuf::from("/r/b.txt"), NodeKind::File { size: 100 });
        tree.mark_scanned(d);
        tree.mark_scanned(root);
        tree
    }

    #[test]
    fn test_grid_paints_every_tile() {
        let tree = sample_tree();
        let tiles = layout(&tree, tree.root(), 0, 0, 40, 10, 12);
        let grid = render_grid(&tiles, 40, 10);

        assert_eq!(grid.len(), 10);
        assert!(grid.iter().all(|row| row.chars().count() == 40));
        let ones = grid.iter().flat_map(|r| r.chars()).filter(|&c| c == '1').count();
        let threes = grid.iter().flat_map(|r| r.chars()).filter(|&c| c == '3').count();
        assert_eq!(ones, 240);
        assert_eq!(threes, 40);
    }

    #[test]
    fn test_report_lists_children_and_extensions() {
        let tree = sample_tree();
        let mut out = Vec::new();
        write_report(&mut out, &tree, 2, 5, 20, 5).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("[1] d/"));
        assert!(text.contains("[2] a.txt"));
        assert!(!text.contains("b.txt"));
        assert!(text.contains("(1 more)"));
        assert!(text.contains(".bin"));
        assert!(text.contains(".txt"));
        assert!(text.contains("3 files"));
        assert!(!text.contains("Risk:"));
    }

    #[test]
    fn test_report_flags_executables() {
        let mut tree = sample_tree();
        let root = tree.root();
        tree.add_child(root, "tool.exe", PathBuf::from("/r/tool.exe"), NodeKind::File { size: 50 });
        tree.add_child(root, "build.ps1", PathBuf::from("/r/build.ps1"), NodeKind::File { size: 5 });

        let mut out = Vec::new();
        write_report(&mut out, &tree, 5, 10, 20, 5).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Risk:"));
        assert!(text.contains("CRITICAL: 1 .exe executable files"));
        assert!(text.contains("WARNING: 1 .ps1 script files"));
        assert!(text.contains("- Consider running antivirus scan"));
    }

    #[test]
    fn test_depth_limited_snapshot_is_not_reused_for_full_scan() {
        let data = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(data.path().join("sub")).unwrap();
        std::fs::write(data.path().join("sub/f.bin"), vec![0u8; 500]).unwrap();
        let cache = ScanCache::new(cache_dir.path());

        let shallow = ScanOptions {
            max_depth: Some(1),
            ..ScanOptions::default()
        };
        let tree = load_or_scan(data.path(), shallow.clone(), Some(&cache));
        assert_eq!(tree.total_size(), 0);

        let tree = load_or_scan(data.path(), ScanOptions::default(), Some(&cache));
        assert_eq!(tree.total_size(), 500);

        // The full scan replaced the shallow snapshot.
        assert!(cache.load(data.path(), &shallow).unwrap().is_none());
        assert_eq!(cache.load(data.path(), &ScanOptions::default()).unwrap().unwrap().total_size(), 500);
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from(["diskmap", "/tmp", "--depth", "2", "--top", "5", "--no-cache"]);
        assert_eq!(cli.path, PathBuf::from("/tmp"));
        assert_eq!(cli.depth, Some(2));
        assert_eq!(cli.top, Some(5));
        assert!(cli.no_cache);
        assert_eq!(cli.width, 80);
    }
}
