use clap::Parser;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
    MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use diskmap::config::Config;
use diskmap::crawler::{apply_listing, read_listing, FileCrawler, Listing, ScanOptions, ScanPhase, ScanProgress, ScanStats};
use diskmap::extensions::RiskLevel;
use diskmap::format::{format_size, percent_of, truncate_label};
use diskmap::logging::{init_logging, LogTarget};
use diskmap::snapshot::ScanCache;
use diskmap::tree::FileTree;
use diskmap::treemap::{layout, Tile};
use diskmap::watch::ChangeWatcher;
use indextree::NodeId;
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Layout, Rect as UiRect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Widget};
use ratatui::{Frame, Terminal};
use std::collections::HashSet;
use std::io::{self, stdout};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "diskmap-tui")]
#[command(about = "Interactive treemap of disk usage")]
#[command(version)]
struct Cli {
    /// Directory to explore
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Config file (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Refresh directories as they change on disk
    #[arg(short, long)]
    watch: bool,

    /// Ignore and do not write the snapshot cache
    #[arg(long)]
    no_cache: bool,
}

enum ScanEvent {
    Progress(ScanProgress),
    Completed(Result<ScanResult, String>),
}

struct ScanResult {
    tree: FileTree,
    stats: ScanStats,
}

struct App {
    root_path: PathBuf,
    options: ScanOptions,
    max_items: usize,
    max_extensions: usize,

    status: String,
    is_scanning: bool,
    scan_progress: Option<ScanProgress>,
    scan_rx: Option<Receiver<ScanEvent>>,
    scan_cancel: Option<Arc<AtomicBool>>,
    last_scan_finished_at: Option<Instant>,

    listing_tx: Sender<Listing>,
    listing_rx: Receiver<Listing>,
    pending_listings: HashSet<PathBuf>,

    file_tree: Option<FileTree>,
    view: Option<NodeId>,
    selected: Option<usize>,
    tiles: Vec<Tile>,
    show_extensions: bool,

    cache: Option<ScanCache>,
    watcher: Option<ChangeWatcher>,

    should_quit: bool,
}

impl App {
    fn new(root_path: PathBuf, config: &Config, cache: Option<ScanCache>, watcher: Option<ChangeWatcher>) -> Self {
        let (listing_tx, listing_rx) = mpsc::channel();
        Self {
            root_path,
            options: config.scan_options(),
            max_items: config.display.max_items,
            max_extensions: config.display.max_extensions,
            status: String::new(),
            is_scanning: false,
            scan_progress: None,
            scan_rx: None,
            scan_cancel: None,
            last_scan_finished_at: None,
            listing_tx,
            listing_rx,
            pending_listings: HashSet::new(),
            file_tree: None,
            view: None,
            selected: None,
            tiles: Vec::new(),
            show_extensions: true,
            cache,
            watcher,
            should_quit: false,
        }
    }

    /// Start from the snapshot cache when there is one, else scan.
    fn load_initial(&mut self) {
        if let Some(cache) = self.cache.as_ref() {
            match cache.load(&self.root_path, &self.options) {
                Ok(Some(tree)) => {
                    info!("restored snapshot of {}", self.root_path.display());
                    self.view = Some(tree.root());
                    self.file_tree = Some(tree);
                    self.status = "Loaded cached snapshot (r: rescan)".to_string();
                    return;
                }
                Ok(None) => {}
                Err(err) => warn!("ignoring cached snapshot: {}", err),
            }
        }
        self.start_scan();
    }

    fn start_scan(&mut self) {
        if self.is_scanning {
            return;
        }

        let path = self.root_path.clone();
        self.status = format!("Scanning {} ...", path.display());
        self.is_scanning = true;
        self.scan_progress = Some(ScanProgress::starting());

        let (tx, rx) = mpsc::channel::<ScanEvent>();
        self.scan_rx = Some(rx);

        let mut crawler = FileCrawler::new(self.options.clone());
        self.scan_cancel = Some(crawler.cancel_handle());

        thread::spawn(move || {
            let progress_tx = tx.clone();
            let reporter = Arc::new(move |progress: ScanProgress| {
                let _ = progress_tx.send(ScanEvent::Progress(progress));
            });

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let (tree, stats) = crawler.scan_with_progress(&path, Some(reporter));
                ScanResult { tree, stats }
            }));

            let event = match result {
                Ok(scan_result) => ScanEvent::Completed(Ok(scan_result)),
                Err(_) => ScanEvent::Completed(Err("Scan thread panicked".to_string())),
            };

            let _ = tx.send(event);
        });
    }

    fn cancel_scan(&mut self) {
        if let Some(flag) = self.scan_cancel.as_ref() {
            flag.store(true, Ordering::Relaxed);
            self.status = "Cancelling scan...".to_string();
        }
    }

    fn poll_scan_updates(&mut self) {
        let mut done: Option<Result<ScanResult, String>> = None;
        let mut disconnected = false;

        if let Some(rx) = self.scan_rx.as_ref() {
            loop {
                match rx.try_recv() {
                    Ok(ScanEvent::Progress(progress)) => {
                        self.scan_progress = Some(progress);
                    }
                    Ok(ScanEvent::Completed(result)) => {
                        done = Some(result);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
        }

        if disconnected {
            self.scan_rx = None;
            self.scan_cancel = None;
            self.is_scanning = false;
            if done.is_none() {
                self.status = "Scan channel disconnected".to_string();
            }
        }

        if let Some(result) = done {
            self.scan_rx = None;
            self.scan_cancel = None;
            self.is_scanning = false;
            self.scan_progress = None;

            match result {
                Ok(scan_result) if scan_result.stats.cancelled && self.file_tree.is_some() => {
                    self.status = "Scan cancelled".to_string();
                }
                Ok(scan_result) => self.adopt_scan(scan_result),
                Err(err) => {
                    self.status = format!("Scan failed: {}", err);
                }
            }
        }
    }

    fn adopt_scan(&mut self, scan_result: ScanResult) {
        let ScanResult { tree, stats } = scan_result;

        // Node ids do not survive a rescan; the viewed path does.
        let view_path = self.view_path();
        self.view = view_path
            .and_then(|path| tree.get_node(&path))
            .or_else(|| Some(tree.root()));
        self.selected = None;
        self.last_scan_finished_at = Some(Instant::now());

        self.status = if stats.cancelled {
            "Scan cancelled; directories load on demand".to_string()
        } else {
            format!(
                "Scan complete: {} files, {} dirs, {} total",
                stats.total_files,
                stats.total_dirs,
                format_size(stats.total_size),
            )
        };

        if !stats.cancelled {
            if let Some(cache) = self.cache.as_ref() {
                if let Err(err) = cache.save(&tree, &self.options) {
                    warn!("could not store snapshot: {}", err);
                }
            }
        }
        self.file_tree = Some(tree);
        self.ensure_view_listed();
    }

    /// Read one directory level off-thread; the result is applied in
    /// `poll_listings`.
    fn request_listing(&mut self, path: PathBuf) {
        if !self.pending_listings.insert(path.clone()) {
            return;
        }
        let tx = self.listing_tx.clone();
        let options = self.options.clone();
        thread::spawn(move || {
            let _ = tx.send(read_listing(&path, &options));
        });
    }

    fn poll_listings(&mut self) {
        let mut applied = 0usize;
        while let Ok(listing) = self.listing_rx.try_recv() {
            self.pending_listings.remove(&listing.path);
            let Some(tree) = self.file_tree.as_mut() else {
                continue;
            };
            // The directory may be gone, or the tree replaced, since the request.
            let Some(id) = tree.get_node(&listing.path) else {
                debug!("dropping listing for {}", listing.path.display());
                continue;
            };
            if !listing.readable {
                debug!("{} is not readable", listing.path.display());
            }
            apply_listing(tree, id, listing);
            applied += 1;
        }

        if applied > 0 {
            self.repair_view();
        }
    }

    fn poll_watcher(&mut self) {
        let Some(watcher) = self.watcher.as_ref() else {
            return;
        };
        if !watcher.has_changes() {
            return;
        }
        let changed = watcher.drain();
        let Some(tree) = self.file_tree.as_ref() else {
            return;
        };

        let refresh: Vec<PathBuf> = changed
            .into_iter()
            .filter(|path| tree.get_node(path).is_some_and(|id| tree.is_scanned(id)))
            .collect();
        for path in refresh {
            self.request_listing(path);
        }
    }

    /// Fall back to the nearest live ancestor if the viewed directory vanished.
    fn repair_view(&mut self) {
        let Some(tree) = self.file_tree.as_ref() else {
            return;
        };
        if self.view.is_some_and(|id| tree.get(id).is_some()) {
            return;
        }
        let fallback = self
            .view_path()
            .and_then(|path| path.ancestors().find_map(|p| tree.get_node(p)))
            .unwrap_or_else(|| tree.root());
        self.view = Some(fallback);
        self.selected = None;
    }

    fn view_path(&self) -> Option<PathBuf> {
        let tree = self.file_tree.as_ref()?;
        let view = self.view?;
        tree.get(view).map(|entry| entry.path.clone())
    }

    fn ensure_view_listed(&mut self) {
        let Some(tree) = self.file_tree.as_ref() else {
            return;
        };
        let Some(view) = self.view else {
            return;
        };
        let pending = tree
            .get(view)
            .filter(|entry| entry.is_dir() && !entry.is_scanned())
            .map(|entry| entry.path.clone());
        if let Some(path) = pending {
            self.request_listing(path);
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c')) {
            self.should_quit = true;
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('r') => self.start_scan(),
            KeyCode::Char('x') => self.show_extensions = !self.show_extensions,
            KeyCode::Char(ch @ '1'..='9') => {
                let index = (ch as u8 - b'1') as usize;
                self.zoom_into_tile(index);
            }
            KeyCode::Enter => {
                if let Some(index) = self.selected {
                    self.zoom_into_tile(index);
                }
            }
            KeyCode::Right | KeyCode::Down | KeyCode::Tab => self.move_selection(1),
            KeyCode::Left | KeyCode::Up | KeyCode::BackTab => self.move_selection(-1),
            KeyCode::Char('u') | KeyCode::Backspace => self.zoom_out_one_level(),
            KeyCode::Esc => {
                if self.is_scanning {
                    self.cancel_scan();
                } else {
                    self.selected = None;
                }
            }
            _ => {}
        }
    }

    fn on_mouse(&mut self, event: MouseEvent) {
        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some(index) = self.tile_at(event.column, event.row) {
                    if self.selected == Some(index) {
                        self.zoom_into_tile(index);
                    } else {
                        self.selected = Some(index);
                    }
                }
            }
            MouseEventKind::Down(MouseButton::Right) | MouseEventKind::Down(MouseButton::Middle) => {
                self.zoom_out_one_level();
            }
            _ => {}
        }
    }

    fn move_selection(&mut self, delta: isize) {
        if self.tiles.is_empty() {
            self.selected = None;
            return;
        }
        let count = self.tiles.len() as isize;
        let next = match self.selected {
            Some(current) => (current as isize + delta).rem_euclid(count),
            None if delta >= 0 => 0,
            None => count - 1,
        };
        self.selected = Some(next as usize);
    }

    fn zoom_into_tile(&mut self, index: usize) {
        let Some(tile) = self.tiles.get(index).copied() else {
            return;
        };
        let Some(tree) = self.file_tree.as_ref() else {
            return;
        };
        if !tree.is_dir(tile.node) {
            self.selected = Some(index);
            return;
        }
        self.view = Some(tile.node);
        self.selected = None;
        self.ensure_view_listed();
    }

    fn zoom_out_one_level(&mut self) {
        let Some(tree) = self.file_tree.as_ref() else {
            return;
        };
        if let Some(parent) = self.view.and_then(|id| tree.parent(id)) {
            let previous = self.view;
            self.view = Some(parent);
            self.selected = previous.and_then(|prev| self.tiles_index_after_zoom_out(prev));
        }
    }

    /// Keep the directory we came from selected after going up, if it will
    /// be among the drawn tiles.
    fn tiles_index_after_zoom_out(&self, previous: NodeId) -> Option<usize> {
        let tree = self.file_tree.as_ref()?;
        let parent = self.view?;
        tree.sorted_children(parent)
            .into_iter()
            .take(self.max_items)
            .position(|id| id == previous)
    }

    fn refresh_tiles(&mut self, area: UiRect) {
        let (Some(tree), Some(view)) = (self.file_tree.as_ref(), self.view) else {
            self.tiles.clear();
            return;
        };
        self.tiles = layout(tree, view, area.x, area.y, area.width, area.height, self.max_items);
        if self.selected.is_some_and(|i| i >= self.tiles.len()) {
            self.selected = None;
        }
    }

    fn tile_at(&self, x: u16, y: u16) -> Option<usize> {
        self.tiles.iter().position(|tile| tile.rect.contains(x, y))
    }
}

fn progress_status(progress: &ScanProgress) -> String {
    match progress.phase {
        ScanPhase::Discovering => format!(
            "Discovering entries... {} found",
            progress.discovered_entries
        ),
        ScanPhase::Processing => {
            if let Some(frac) = progress.fraction() {
                format!(
                    "Processing {:.0}% | files: {} dirs: {} | {}",
                    frac * 100.0,
                    progress.total_files,
                    progress.total_dirs,
                    format_size(progress.total_size),
                )
            } else {
                format!(
                    "Processing... files: {} dirs: {} | {}",
                    progress.total_files,
                    progress.total_dirs,
                    format_size(progress.total_size),
                )
            }
        }
    }
}

fn tile_color(is_dir: bool, size: u64, max_size: u64) -> Color {
    let ratio = if max_size == 0 {
        0.0
    } else {
        (size as f32 / max_size as f32).clamp(0.0, 1.0)
    };

    if is_dir {
        let r = (35.0 + ratio * 65.0) as u8;
        let g = (95.0 + ratio * 95.0) as u8;
        let b = (145.0 + ratio * 85.0) as u8;
        Color::Rgb(r, g, b)
    } else {
        let r = (55.0 + ratio * 120.0) as u8;
        let g = (85.0 + ratio * 95.0) as u8;
        let b = (95.0 + ratio * 70.0) as u8;
        Color::Rgb(r, g, b)
    }
}

struct TreemapWidget<'a> {
    tree: &'a FileTree,
    tiles: &'a [Tile],
    selected: Option<usize>,
}

impl Widget for TreemapWidget<'_> {
    fn render(self, area: UiRect, buf: &mut Buffer) {
        if area.width == 0 || area.height == 0 {
            return;
        }

        for y in area.y..area.y.saturating_add(area.height) {
            for x in area.x..area.x.saturating_add(area.width) {
                buf[(x, y)]
                    .set_char(' ')
                    .set_style(Style::default().bg(Color::Rgb(18, 18, 20)));
            }
        }

        let max_size = self
            .tiles
            .iter()
            .map(|tile| self.tree.aggregate_size(tile.node))
            .max()
            .unwrap_or(0);

        for (index, tile) in self.tiles.iter().enumerate() {
            if tile.rect.is_empty() {
                continue;
            }
            let Some(entry) = self.tree.get(tile.node) else {
                continue;
            };
            let size = self.tree.aggregate_size(tile.node);

            let x0 = tile.rect.x;
            let y0 = tile.rect.y;
            let x1 = x0 + tile.rect.width - 1;
            let y1 = y0 + tile.rect.height - 1;

            let bg = tile_color(entry.is_dir(), size, max_size);
            let border_color = if self.selected == Some(index) {
                Color::Rgb(246, 211, 101)
            } else {
                Color::Rgb(224, 224, 224)
            };
            let border = Style::default().fg(border_color).bg(bg);

            for y in y0..=y1 {
                for x in x0..=x1 {
                    buf[(x, y)]
                        .set_char(' ')
                        .set_style(Style::default().bg(bg).fg(Color::White));
                }
            }

            if tile.rect.width < 2 || tile.rect.height < 2 {
                continue;
            }

            for x in x0..=x1 {
                buf[(x, y0)].set_char('─').set_style(border);
                buf[(x, y1)].set_char('─').set_style(border);
            }
            for y in y0..=y1 {
                buf[(x0, y)].set_char('│').set_style(border);
                buf[(x1, y)].set_char('│').set_style(border);
            }
            buf[(x0, y0)].set_char('┌').set_style(border);
            buf[(x1, y0)].set_char('┐').set_style(border);
            buf[(x0, y1)].set_char('└').set_style(border);
            buf[(x1, y1)].set_char('┘').set_style(border);

            let label_width = tile.rect.width.saturating_sub(2) as usize;
            if label_width >= 4 {
                let key = if index < 9 {
                    format!("{} ", index + 1)
                } else {
                    String::new()
                };
                let marker = if entry.is_dir() && !entry.is_scanned() { "…" } else { "" };
                let label = format!("{}{}{} {}", key, entry.name, marker, format_size(size));
                let label = truncate_label(&label, label_width);

                for (i, ch) in label.chars().enumerate() {
                    let x = x0 + 1 + i as u16;
                    buf[(x, y0)]
                        .set_char(ch)
                        .set_style(Style::default().fg(Color::White).bg(bg).add_modifier(Modifier::BOLD));
                }
            }
        }
    }
}

fn draw_ui(frame: &mut Frame, app: &mut App) {
    let root = frame.area();
    let split = Layout::horizontal([Constraint::Length(42), Constraint::Min(30)]).split(root);
    let left = split[0];
    let right = split[1];

    let left_block = Block::default()
        .title(" diskmap ")
        .borders(Borders::ALL);
    let left_inner = left_block.inner(left);
    frame.render_widget(left_block, left);

    let left_rows = Layout::vertical([
        Constraint::Length(4),
        Constraint::Length(7),
        Constraint::Min(4),
        Constraint::Length(5),
    ])
    .split(left_inner);

    let progress_text = if app.is_scanning {
        app.scan_progress
            .as_ref()
            .map(progress_status)
            .unwrap_or_else(|| "Scanning...".to_string())
    } else {
        app.status.clone()
    };
    frame.render_widget(
        Paragraph::new(progress_text).block(Block::default().title(" Status ").borders(Borders::ALL)),
        left_rows[0],
    );

    frame.render_widget(
        Paragraph::new(selection_lines(app)).block(Block::default().title(" Selection ").borders(Borders::ALL)),
        left_rows[1],
    );

    if app.show_extensions {
        frame.render_widget(
            Paragraph::new(extension_lines(app)).block(Block::default().title(" Extensions ").borders(Borders::ALL)),
            left_rows[2],
        );
    }

    let help_lines = vec![
        Line::from("1-9/Enter/click: open   u/Bksp: up"),
        Line::from("arrows/Tab: select   x: extensions"),
        Line::from("r: rescan   Esc: cancel   q: quit"),
    ];
    frame.render_widget(
        Paragraph::new(help_lines).block(Block::default().title(" Controls ").borders(Borders::ALL)),
        left_rows[3],
    );

    let treemap_title = app
        .view_path()
        .map(|p| format!(" {} ", p.display()))
        .unwrap_or_else(|| " Treemap ".to_string());
    let treemap_block = Block::default().title(treemap_title).borders(Borders::ALL);
    let treemap_inner = treemap_block.inner(right);
    frame.render_widget(treemap_block, right);

    app.refresh_tiles(treemap_inner);
    match app.file_tree.as_ref() {
        Some(tree) if !app.tiles.is_empty() => frame.render_widget(
            TreemapWidget {
                tree,
                tiles: &app.tiles,
                selected: app.selected,
            },
            treemap_inner,
        ),
        Some(_) => frame.render_widget(
            Paragraph::new("Nothing to show here.").style(Style::default().fg(Color::Gray)),
            treemap_inner,
        ),
        None => frame.render_widget(
            Paragraph::new("Waiting for the first scan...").style(Style::default().fg(Color::Gray)),
            treemap_inner,
        ),
    }
}

fn selection_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let Some(tree) = app.file_tree.as_ref() else {
        return lines;
    };

    if let Some(view) = app.view {
        let crumbs: Vec<String> = tree
            .breadcrumbs(view)
            .into_iter()
            .filter_map(|id| tree.get(id).map(|e| e.name.clone()))
            .collect();
        lines.push(Line::from(vec![
            Span::styled("View: ", Style::default().fg(Color::Gray)),
            Span::raw(crumbs.join(" / ")),
        ]));
        lines.push(Line::from(vec![
            Span::styled("Size: ", Style::default().fg(Color::Gray)),
            Span::raw(format_size(tree.aggregate_size(view))),
            Span::raw(format!("  {} files", tree.file_count(view))),
        ]));
    }

    match app.selected.and_then(|i| app.tiles.get(i)).and_then(|t| tree.get(t.node).map(|e| (t, e))) {
        Some((tile, entry)) => {
            let size = tree.aggregate_size(tile.node);
            let parent_size = app.view.map(|v| tree.aggregate_size(v)).unwrap_or(0);
            lines.push(Line::from(vec![
                Span::styled("Selected: ", Style::default().fg(Color::Gray)),
                Span::raw(entry.name.clone()),
            ]));
            lines.push(Line::from(vec![
                Span::styled("Type: ", Style::default().fg(Color::Gray)),
                Span::raw(match (entry.is_dir(), entry.is_scanned()) {
                    (false, _) => "file",
                    (true, true) => "directory",
                    (true, false) => "directory (not loaded)",
                }),
            ]));
            lines.push(Line::from(format!(
                "{}  {:.1}% of view",
                format_size(size),
                percent_of(size, parent_size)
            )));
        }
        None => lines.push(Line::from("Selected: (none)")),
    }

    if let Some(instant) = app.last_scan_finished_at {
        lines.push(Line::from(format!("Last scan: {}s ago", instant.elapsed().as_secs())));
    }
    lines
}

fn extension_lines(app: &App) -> Vec<Line<'static>> {
    let (Some(tree), Some(view)) = (app.file_tree.as_ref(), app.view) else {
        return Vec::new();
    };
    let stats = tree.extension_stats(view);
    let mut lines: Vec<Line<'static>> = stats
        .ranked(app.max_extensions)
        .into_iter()
        .map(|row| {
            Line::from(vec![
                Span::styled(
                    format!("{:<10}", truncate_label(&row.extension, 10)),
                    Style::default().fg(Color::Cyan),
                ),
                Span::raw(format!(
                    "{:>10} {:>5.1}% {:>6}",
                    format_size(row.total_size),
                    row.percent_by_size,
                    row.count
                )),
            ])
        })
        .collect();

    let risk = stats.risk_summary();
    if !risk.findings.is_empty() {
        lines.push(Line::from(""));
        for finding in &risk.findings {
            let color = match finding.level {
                RiskLevel::Critical => Color::Red,
                RiskLevel::Warning => Color::Yellow,
            };
            lines.push(Line::from(Span::styled(finding.to_string(), Style::default().fg(color))));
        }
    }
    lines
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>, app: &mut App) -> io::Result<()> {
    app.load_initial();

    loop {
        app.poll_scan_updates();
        app.poll_listings();
        app.poll_watcher();

        terminal.draw(|frame| {
            draw_ui(frame, app);
        })?;

        if app.should_quit {
            break;
        }

        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) => app.on_key(key),
                Event::Mouse(mouse) => app.on_mouse(mouse),
                Event::Resize(_, _) => {}
                Event::FocusGained | Event::FocusLost | Event::Paste(_) => {}
            }
        }
    }

    app.cancel_scan();
    Ok(())
}

fn open_cache(config: &Config, no_cache: bool) -> Option<ScanCache> {
    if no_cache || !config.cache.enabled {
        return None;
    }
    ScanCache::from_config(&config.cache)
        .map_err(|err| warn!("cache disabled: {}", err))
        .ok()
}

fn open_watcher(root: &Path) -> Option<ChangeWatcher> {
    ChangeWatcher::new(root)
        .map_err(|err| warn!("not watching {}: {}", root.display(), err))
        .ok()
}

fn main() -> diskmap::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.logging, LogTarget::for_terminal_ui(&config.logging))?;

    let root = cli.path.canonicalize()?;
    let cache = open_cache(&config, cli.no_cache);
    let watcher = if cli.watch { open_watcher(&root) } else { None };
    let mut app = App::new(root, &config, cache, watcher);

    enable_raw_mode()?;
    crossterm::execute!(stdout(), EnterAlternateScreen, EnableMouseCapture)?;

    let backend = CrosstermBackend::new(stdout());
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let app_result = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    app_result?;
    Ok(())
}
