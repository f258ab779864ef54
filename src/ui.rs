use std::cell::Cell;
use std::io::{self, Stdout};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseEvent,
    MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::wrap;

use crate::feed::{LoadOutcome, ScrollSignal};
use crate::page::{self, Membership, MembershipChange, Navigation, SubredditPage};
use crate::reddit::{Post, SortOption};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Lines each post occupies in the list: title, meta, spacer.
const ROW_LINES: usize = 3;
const MOUSE_SCROLL_ROWS: usize = 3;

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

enum AsyncResponse {
    Membership {
        change: MembershipChange,
        result: Result<()>,
    },
}

pub struct Options {
    pub page: SubredditPage,
    pub status_message: String,
    pub tick_rate: Duration,
}

pub struct Model {
    page: SubredditPage,
    status_message: String,
    status_is_error: bool,
    selected_post: usize,
    post_offset: Cell<usize>,
    post_view_rows: Cell<usize>,
    membership_pending: bool,
    needs_redraw: bool,
    spinner: Spinner,
    tick_rate: Duration,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            page: opts.page,
            status_message: opts.status_message,
            status_is_error: false,
            selected_post: 0,
            post_offset: Cell::new(0),
            post_view_rows: Cell::new(1),
            membership_pending: false,
            needs_redraw: true,
            spinner: Spinner::new(),
            tick_rate: opts.tick_rate,
            response_tx,
            response_rx,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        if self.page.start() {
            self.set_status(format!(
                "Loading {} ({})...",
                self.page.subreddit().prefixed_name(),
                sort_label(self.page.sort())
            ));
        }

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => self.set_error(format!("Error: {err:#}")),
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn is_loading(&self) -> bool {
        self.page.feed().is_loading() || self.membership_pending
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn set_status<S: Into<String>>(&mut self, message: S) {
        self.status_message = message.into();
        self.status_is_error = false;
        self.mark_dirty();
    }

    fn set_error<S: Into<String>>(&mut self, message: S) {
        self.status_message = message.into();
        self.status_is_error = true;
        self.mark_dirty();
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        for outcome in self.page.feed_mut().poll() {
            self.handle_feed_outcome(outcome);
            changed = true;
        }
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_feed_outcome(&mut self, outcome: Result<LoadOutcome, crate::data::FetchError>) {
        let name = self.page.subreddit().prefixed_name();
        let sort = sort_label(self.page.sort());
        match outcome {
            Ok(LoadOutcome::Appended(count)) => {
                let total = self.page.posts().len();
                if total == count {
                    self.set_status(format!("Loaded {count} posts from {name} ({sort})."));
                } else {
                    self.set_status(format!(
                        "Loaded {count} more posts from {name} ({sort}), {total} total."
                    ));
                }
            }
            Ok(LoadOutcome::Exhausted) => {
                if self.page.posts().is_empty() {
                    self.set_status(format!("No posts available for {name} ({sort})."));
                } else {
                    self.set_status(format!("Reached end of {name} ({sort})."));
                }
            }
            Ok(LoadOutcome::Superseded) | Ok(LoadOutcome::Stale) => {}
            Err(err) => self.set_error(format!("Failed to load posts: {err}")),
        }
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Membership { change, result } => {
                self.membership_pending = false;
                match self.page.apply_membership(&change, result) {
                    Ok(Membership::Joined) => {
                        let name = self.page.subreddit().prefixed_name();
                        self.set_status(format!("Joined {name}."));
                    }
                    Ok(Membership::NotJoined) => {
                        let name = self.page.subreddit().prefixed_name();
                        self.set_status(format!("Left {name}."));
                    }
                    Err(err) => self.set_error(err.to_string()),
                }
            }
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.navigate(1, false),
            KeyCode::Char('k') | KeyCode::Up => self.navigate(-1, false),
            KeyCode::PageDown => {
                let step = self.page_step();
                self.navigate(step, false);
            }
            KeyCode::PageUp => {
                let step = self.page_step();
                self.navigate(-step, false);
            }
            KeyCode::Char('g') | KeyCode::Home => self.select_post_at(0, false),
            KeyCode::Char('G') | KeyCode::End => {
                let last = self.page.posts().len().saturating_sub(1);
                self.select_post_at(last, false);
            }
            KeyCode::Enter => {
                let nav = self
                    .selected()
                    .map(page::post_navigation)
                    .transpose()?;
                if let Some(nav) = nav {
                    self.open_navigation(nav);
                }
            }
            KeyCode::Char('u') => {
                if let Some(post) = self.selected() {
                    match page::author_navigation(post) {
                        Some(nav) => self.open_navigation(nav),
                        None => self.set_status("This post's author has no profile."),
                    }
                }
            }
            KeyCode::Char('y') => self.copy_selected_link()?,
            KeyCode::Char('s') => self.toggle_membership(),
            KeyCode::Char('r') => self.reload(None),
            KeyCode::Char(ch @ '1'..='5') => {
                let index = ch as usize - '1' as usize;
                self.reload(Some(SortOption::ALL[index]));
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_mouse(&mut self, event: MouseEvent) {
        match event.kind {
            MouseEventKind::ScrollDown => self.scroll_view(MOUSE_SCROLL_ROWS as i64),
            MouseEventKind::ScrollUp => self.scroll_view(-(MOUSE_SCROLL_ROWS as i64)),
            _ => {}
        }
    }

    fn selected(&self) -> Option<&Post> {
        self.page.posts().get(self.selected_post)
    }

    fn page_step(&self) -> i64 {
        (self.post_view_rows.get() / ROW_LINES).max(1) as i64
    }

    fn navigate(&mut self, delta: i64, is_intermediate: bool) {
        let len = self.page.posts().len();
        if len == 0 {
            self.emit_scroll_signal(is_intermediate);
            return;
        }
        let target = (self.selected_post as i64 + delta).clamp(0, len as i64 - 1) as usize;
        self.select_post_at(target, is_intermediate);
    }

    fn select_post_at(&mut self, index: usize, is_intermediate: bool) {
        let len = self.page.posts().len();
        self.selected_post = index.min(len.saturating_sub(1));
        self.ensure_post_visible();
        self.emit_scroll_signal(is_intermediate);
        self.mark_dirty();
    }

    /// Wheel scrolling moves the viewport; the selection follows it.
    fn scroll_view(&mut self, rows: i64) {
        let len = self.page.posts().len();
        let visible = self.visible_rows();
        let max_offset = len.saturating_sub(visible);
        let offset = (self.post_offset.get() as i64 + rows).clamp(0, max_offset as i64) as usize;
        self.post_offset.set(offset);
        let last_visible = (offset + visible).saturating_sub(1);
        self.selected_post = self
            .selected_post
            .clamp(offset, last_visible.max(offset))
            .min(len.saturating_sub(1));
        self.emit_scroll_signal(true);
        self.mark_dirty();
    }

    fn visible_rows(&self) -> usize {
        (self.post_view_rows.get() / ROW_LINES).max(1)
    }

    fn ensure_post_visible(&self) {
        let visible = self.visible_rows();
        let mut offset = self.post_offset.get();
        if self.selected_post < offset {
            offset = self.selected_post;
        } else if self.selected_post >= offset + visible {
            offset = self.selected_post + 1 - visible;
        }
        self.post_offset.set(offset);
    }

    fn emit_scroll_signal(&mut self, is_intermediate: bool) {
        let signal = scroll_signal(
            self.post_offset.get(),
            self.page.posts().len(),
            self.post_view_rows.get(),
            is_intermediate,
        );
        if self.page.feed_mut().on_near_end(signal) {
            let name = self.page.subreddit().prefixed_name();
            let sort = sort_label(self.page.sort());
            self.spinner.reset();
            self.set_status(format!("Loading more posts from {name} ({sort})..."));
        }
    }

    fn reload(&mut self, sort: Option<SortOption>) {
        self.selected_post = 0;
        self.post_offset.set(0);
        if self.page.feed_mut().reload(sort) {
            let name = self.page.subreddit().prefixed_name();
            let sort = sort_label(self.page.sort());
            self.spinner.reset();
            self.set_status(format!("Loading {name} ({sort})..."));
        }
    }

    fn open_navigation(&mut self, nav: Navigation) {
        let url = nav.url().to_string();
        let label = match &nav {
            Navigation::Profile { username, .. } => format!("u/{username}"),
            Navigation::Post { .. } => "post".to_string(),
        };
        match webbrowser::open(&url) {
            Ok(_) => self.set_status(format!("Opened {label} in your browser.")),
            Err(err) => self.set_error(format!("Failed to open {label}: {err} (URL: {url})")),
        }
    }

    fn copy_selected_link(&mut self) -> Result<()> {
        let Some(post) = self.selected() else {
            return Ok(());
        };
        let link = page::post_link(post)?;
        let mut clipboard =
            arboard::Clipboard::new().map_err(|err| anyhow!("open clipboard: {}", err))?;
        clipboard
            .set_text(link.clone())
            .map_err(|err| anyhow!("copy link: {}", err))?;
        self.set_status(format!("Copied {link}"));
        Ok(())
    }

    fn toggle_membership(&mut self) {
        if self.membership_pending {
            return;
        }
        let change = self.page.membership_change();
        let service = self.page.subreddit_service();
        let tx = self.response_tx.clone();
        self.membership_pending = true;
        self.spinner.reset();
        self.set_status(match change.target {
            Membership::Joined => "Joining...",
            Membership::NotJoined => "Leaving...",
        });
        thread::spawn(move || {
            let result = change.run(service.as_ref());
            let _ = tx.send(AsyncResponse::Membership { change, result });
        });
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let header = self.header_text(full.width.saturating_sub(2) as usize);
        let header_height = (header.lines.len() as u16 + 2).min(full.height / 2);
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(header_height),
                Constraint::Min(3),
                Constraint::Length(2),
            ])
            .split(full);

        self.draw_header(frame, layout[0], header);
        self.draw_posts(frame, layout[1]);
        self.draw_footer(frame, layout[2]);
    }

    fn header_text(&self, width: usize) -> Text<'static> {
        let subreddit = self.page.subreddit();
        let mut lines = Vec::new();
        if let Some(title) = self.page.display_title() {
            lines.push(Line::from(Span::styled(
                title.to_string(),
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .add_modifier(Modifier::BOLD),
            )));
        }

        let membership = self.page.membership();
        let badge_style = match membership {
            Membership::Joined => Style::default().fg(COLOR_SUCCESS),
            Membership::NotJoined => Style::default().fg(COLOR_ACCENT),
        };
        let mut stats = vec![
            Span::styled(
                format!("[{}]", membership.label()),
                badge_style.add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("  {} members", format_count(subreddit.subscribers)),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
        ];
        if let Some(active) = subreddit.active_user_count {
            stats.push(Span::styled(
                format!(" · {} online", format_count(active)),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ));
        }
        if subreddit.over_18 {
            stats.push(Span::styled(" · NSFW", Style::default().fg(COLOR_ERROR)));
        }
        lines.push(Line::from(stats));

        let description = subreddit.public_description.trim();
        if !description.is_empty() {
            for line in wrap(description, width.max(10)) {
                lines.push(Line::from(Span::styled(
                    line.into_owned(),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )));
            }
        }
        if let Some(banner) = self.page.banner_url() {
            lines.push(Line::from(Span::styled(
                format!("Banner: {banner}"),
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            )));
        }
        Text::from(lines)
    }

    fn draw_header(&self, frame: &mut Frame<'_>, area: Rect, text: Text<'static>) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .title(Span::styled(
                self.page.subreddit().prefixed_name(),
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let paragraph = Paragraph::new(text)
            .block(block)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn draw_posts(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .title(format!("Posts {}", sort_label(self.page.sort())))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        self.post_view_rows.set(inner.height as usize);
        self.ensure_post_visible();

        let posts = self.page.posts();
        if posts.is_empty() {
            let message = if self.page.feed().is_loading() {
                format!("{} Loading posts…", self.spinner.frame())
            } else {
                "No posts loaded. Press r to retry.".to_string()
            };
            let paragraph = Paragraph::new(Line::from(Span::styled(
                message,
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            )));
            frame.render_widget(paragraph, inner);
            return;
        }

        let now = Utc::now();
        let width = inner.width.max(1) as usize;
        let offset = self.post_offset.get().min(posts.len());
        let visible = self.visible_rows();
        let mut items: Vec<ListItem> = posts
            .iter()
            .enumerate()
            .skip(offset)
            .take(visible)
            .map(|(index, post)| post_item(post, index == self.selected_post, width, now))
            .collect();

        let at_end = offset + visible >= posts.len();
        if at_end && self.page.feed().is_loading() {
            items.push(ListItem::new(Line::from(Span::styled(
                format!("{} Loading more posts…", self.spinner.frame()),
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))));
        }

        frame.render_widget(List::new(items), inner);
    }

    fn draw_footer(&self, frame: &mut Frame<'_>, area: Rect) {
        let status_style = if self.status_is_error {
            Style::default().fg(COLOR_ERROR)
        } else {
            Style::default().fg(COLOR_TEXT_PRIMARY)
        };
        let mut status = Vec::new();
        if self.is_loading() {
            status.push(Span::styled(
                format!("{} ", self.spinner.frame()),
                Style::default().fg(COLOR_ACCENT),
            ));
        }
        status.push(Span::styled(self.status_message.clone(), status_style));

        let hints = Line::from(Span::styled(
            "j/k move · Enter open · u author · y copy link · s join/leave · 1-5 sort · r reload · q quit",
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ));
        let paragraph = Paragraph::new(Text::from(vec![Line::from(status), hints]))
            .style(Style::default().bg(COLOR_BG));
        frame.render_widget(paragraph, area);
    }
}

/// Converts the list viewport into a distance report, one unit per line.
fn scroll_signal(
    first_row: usize,
    total_rows: usize,
    view_lines: usize,
    is_intermediate: bool,
) -> ScrollSignal {
    let offset = first_row * ROW_LINES;
    let content = total_rows * ROW_LINES;
    let max_offset = content.saturating_sub(view_lines).max(offset);
    ScrollSignal::new(offset as f64, max_offset as f64, is_intermediate)
}

fn post_item(post: &Post, selected: bool, width: usize, now: DateTime<Utc>) -> ListItem<'static> {
    let background = if selected {
        COLOR_PANEL_SELECTED_BG
    } else {
        COLOR_PANEL_BG
    };
    let mut title_style = Style::default().fg(COLOR_TEXT_PRIMARY).bg(background);
    if selected {
        title_style = title_style.add_modifier(Modifier::BOLD);
    }
    let meta_style = Style::default().fg(COLOR_TEXT_SECONDARY).bg(background);

    let mut title_spans = vec![Span::styled(
        format!("{:>6} ", format_count(post.score)),
        Style::default().fg(COLOR_ACCENT).bg(background),
    )];
    if post.stickied {
        title_spans.push(Span::styled(
            "[pinned] ",
            Style::default().fg(COLOR_SUCCESS).bg(background),
        ));
    }
    if let Some(flair) = post.link_flair_text.as_deref().filter(|f| !f.trim().is_empty()) {
        title_spans.push(Span::styled(format!("[{}] ", flair.trim()), meta_style));
    }
    let title = post.title.trim();
    let budget = width.saturating_sub(8);
    title_spans.push(Span::styled(truncate(title, budget), title_style));

    let mut meta = format!(
        "       u/{} · {} comments",
        post.author,
        format_count(post.num_comments)
    );
    if let Some(age) = relative_age(post.created_utc, now) {
        meta.push_str(&format!(" · {age}"));
    }
    if post.over_18 {
        meta.push_str(" · NSFW");
    }
    if post.spoiler {
        meta.push_str(" · spoiler");
    }

    ListItem::new(vec![
        Line::from(title_spans),
        Line::from(Span::styled(truncate(&meta, width), meta_style)),
        Line::from(""),
    ])
}

fn sort_label(sort: SortOption) -> &'static str {
    match sort {
        SortOption::Hot => "/hot",
        SortOption::New => "/new",
        SortOption::Top => "/top",
        SortOption::Rising => "/rising",
        SortOption::Controversial => "/controversial",
    }
}

fn format_count(value: i64) -> String {
    let abs = value.unsigned_abs();
    let sign = if value < 0 { "-" } else { "" };
    if abs >= 1_000_000 {
        format!("{sign}{:.1}m", abs as f64 / 1_000_000.0)
    } else if abs >= 10_000 {
        format!("{sign}{}k", abs / 1000)
    } else if abs >= 1000 {
        format!("{sign}{:.1}k", abs as f64 / 1000.0)
    } else {
        value.to_string()
    }
}

fn relative_age(created_utc: f64, now: DateTime<Utc>) -> Option<String> {
    if created_utc <= 0.0 {
        return None;
    }
    let created = Utc.timestamp_opt(created_utc.trunc() as i64, 0).single()?;
    let elapsed = now.signed_duration_since(created);
    let minutes = elapsed.num_minutes().max(0);
    Some(if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if minutes < 60 * 24 {
        format!("{}h ago", minutes / 60)
    } else if minutes < 60 * 24 * 365 {
        format!("{}d ago", minutes / (60 * 24))
    } else {
        format!("{}y ago", minutes / (60 * 24 * 365))
    })
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width <= 1 {
        return "…".chars().take(width).collect();
    }
    let mut out: String = text.chars().take(width - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::data::{MockFeedService, MockSubredditService};
    use crate::feed::LoaderState;
    use std::sync::Arc;

    /// A model showing the first 50 mock posts in a 30-line list (ten rows).
    fn loaded_model(cfg: FeedConfig) -> Model {
        let mut page = SubredditPage::open(
            "rust",
            Arc::new(MockFeedService::default()),
            Arc::new(MockSubredditService),
            &cfg,
        )
        .unwrap();
        assert!(page.start());
        let first = page.feed_mut().wait(Duration::from_secs(5)).unwrap();
        assert_eq!(first.unwrap(), LoadOutcome::Appended(50));
        let model = Model::new(Options {
            page,
            status_message: String::new(),
            tick_rate: Duration::from_millis(120),
        });
        model.post_view_rows.set(30);
        model
    }

    fn loader_state(model: &Model) -> LoaderState {
        model.page.feed().loader().state()
    }

    #[test]
    fn wheel_scrolling_loads_once_near_the_end() {
        let mut model = loaded_model(FeedConfig::default());
        let mut started = None;
        for _ in 0..14 {
            model.scroll_view(MOUSE_SCROLL_ROWS as i64);
            if started.is_none() && model.page.feed().is_loading() {
                started = Some((model.post_offset.get(), loader_state(&model)));
            }
        }
        // Row 30 of 40 leaves 30 lines below the viewport, inside the 36 threshold.
        let (offset, state) = started.unwrap();
        assert_eq!(offset, 30);
        assert_eq!(model.post_offset.get(), 40);
        assert_eq!(loader_state(&model), state);
    }

    #[test]
    fn key_navigation_loads_near_the_end() {
        let mut model = loaded_model(FeedConfig::default());
        model.navigate(1, false);
        model.select_post_at(27, false);
        assert!(!model.page.feed().is_loading());

        model.select_post_at(38, false);
        assert!(model.page.feed().is_loading());
        let state = loader_state(&model);
        model.navigate(1, false);
        model.handle_key(KeyCode::Char('G')).unwrap();
        assert_eq!(loader_state(&model), state);
    }

    #[test]
    fn wheel_is_ignored_when_intermediate_signals_are_off() {
        let mut model = loaded_model(FeedConfig {
            ignore_intermediate: true,
            ..FeedConfig::default()
        });
        for _ in 0..14 {
            model.scroll_view(MOUSE_SCROLL_ROWS as i64);
        }
        assert_eq!(model.post_offset.get(), 40);
        assert!(!model.page.feed().is_loading());

        model.navigate(0, false);
        assert!(model.page.feed().is_loading());
    }

    #[test]
    fn repeated_reload_keys_keep_one_request() {
        let mut model = loaded_model(FeedConfig::default());
        model.handle_key(KeyCode::Char('r')).unwrap();
        let state = loader_state(&model);
        assert!(matches!(state, LoaderState::Loading { .. }));

        model.handle_key(KeyCode::Char('r')).unwrap();
        model.handle_key(KeyCode::Char('3')).unwrap();
        assert_eq!(loader_state(&model), state);
        assert_eq!(model.page.sort(), SortOption::Top);
        assert!(model.page.posts().is_empty());
    }

    #[test]
    fn scroll_signal_measures_lines() {
        let signal = scroll_signal(10, 50, 30, false);
        assert_eq!(signal.offset, 30.0);
        assert_eq!(signal.max_offset, 120.0);
        assert_eq!(signal.remaining(), 90.0);
    }

    #[test]
    fn short_feeds_are_always_near_end() {
        let signal = scroll_signal(0, 4, 30, false);
        assert_eq!(signal.remaining(), 0.0);
    }

    #[test]
    fn counts_are_abbreviated() {
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1250), "1.2k");
        assert_eq!(format_count(45_000), "45k");
        assert_eq!(format_count(3_400_000), "3.4m");
        assert_eq!(format_count(-12), "-12");
    }

    #[test]
    fn ages_are_relative() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        assert_eq!(relative_age(0.0, now), None);
        assert_eq!(relative_age(1_700_000_000.0 - 30.0, now).unwrap(), "just now");
        assert_eq!(relative_age(1_700_000_000.0 - 600.0, now).unwrap(), "10m ago");
        assert_eq!(relative_age(1_700_000_000.0 - 7200.0, now).unwrap(), "2h ago");
        assert_eq!(
            relative_age(1_700_000_000.0 - 3.0 * 86400.0, now).unwrap(),
            "3d ago"
        );
    }

    #[test]
    fn truncate_respects_width() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer title", 6), "a lon…");
    }
}
