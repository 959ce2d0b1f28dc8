use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use log::info;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;

use crate::capture::{
    CaptureController, SessionReport, SessionState, SourceOpener, TerminationReason,
};
use crate::config::UiConfig;
use crate::decode::PacketSummary;
use crate::sink::ChannelSink;
use crate::utils::formatting::{format_bytes, format_duration, truncate_string};

/// Summaries pulled off the channel per refresh.
const DRAIN_LIMIT: usize = 2048;

/// Live packet list with pause / stop / restart controls.
pub struct App<O: SourceOpener> {
    pub should_quit: bool,
    controller: CaptureController<O, ChannelSink>,
    events: mpsc::Receiver<PacketSummary>,
    device: String,
    settings: UiConfig,
    recent: VecDeque<PacketSummary>,
    list_state: ListState,
    packets_seen: u64,
    bytes_seen: u64,
    protocol_counts: HashMap<String, u64>,
    status: String,
    reports: Vec<SessionReport>,
    first_seen: Option<chrono::DateTime<chrono::Utc>>,
    last_seen: Option<chrono::DateTime<chrono::Utc>>,
}

impl<O: SourceOpener> App<O> {
    pub fn new(
        controller: CaptureController<O, ChannelSink>,
        events: mpsc::Receiver<PacketSummary>,
        device: impl Into<String>,
        settings: UiConfig,
    ) -> Self {
        App {
            should_quit: false,
            controller,
            events,
            device: device.into(),
            settings,
            recent: VecDeque::new(),
            list_state: ListState::default(),
            packets_seen: 0,
            bytes_seen: 0,
            protocol_counts: HashMap::new(),
            status: String::new(),
            reports: Vec::new(),
            first_seen: None,
            last_seen: None,
        }
    }

    /// Starts a capture on the configured device. Needs an entered tokio runtime.
    pub fn start(&mut self) {
        let id = self.controller.start_capture(&self.device);
        self.status = format!("Capturing on {} (session {})", self.device, id);
    }

    pub fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        io::stdout().execute(LeaveAlternateScreen)?;
        io::stdout().execute(DisableMouseCapture)?;
        result
    }

    /// Stops every session and waits for the capture handles to be released.
    /// Returns the reports of every session the view ran.
    ///
    /// Closes the event channel first so a session blocked on a full channel
    /// can observe the stop. The view cannot capture again afterwards.
    pub async fn shutdown(&mut self) -> Vec<SessionReport> {
        self.events.close();
        while let Ok(summary) = self.events.try_recv() {
            self.ingest(summary);
        }
        let mut reports = std::mem::take(&mut self.reports);
        reports.extend(self.controller.shutdown().await);
        info!(
            "Live view closed after {} packets ({})",
            self.packets_seen,
            format_bytes(self.bytes_seen)
        );
        reports
    }

    fn event_loop<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        let tick = Duration::from_millis(self.settings.refresh_rate_ms.max(10));
        loop {
            self.drain_events();
            self.refresh_status();
            terminal.draw(|f| self.draw(f))?;

            if self.should_quit {
                return Ok(());
            }

            if event::poll(tick)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code);
                    }
                }
            }
        }
    }

    fn drain_events(&mut self) {
        for _ in 0..DRAIN_LIMIT {
            match self.events.try_recv() {
                Ok(summary) => self.ingest(summary),
                Err(_) => break,
            }
        }
    }

    fn ingest(&mut self, summary: PacketSummary) {
        self.packets_seen += 1;
        self.bytes_seen += summary.length_bytes() as u64;
        let label = match summary.protocol_label() {
            "" => "other".to_string(),
            label => label.to_string(),
        };
        *self.protocol_counts.entry(label).or_insert(0) += 1;
        self.first_seen.get_or_insert(summary.captured_at());
        self.last_seen = Some(summary.captured_at());

        self.recent.push_back(summary);
        while self.recent.len() > self.settings.max_rows.max(1) {
            self.recent.pop_front();
            if let Some(selected) = self.list_state.selected() {
                self.list_state.select(Some(selected.saturating_sub(1)));
            }
        }
    }

    fn refresh_status(&mut self) {
        for report in self.controller.reap() {
            info!(
                "Session {} on {} ended ({}), {} packets delivered",
                report.session, report.device, report.reason, report.stats.frames_delivered
            );
            match report.reason {
                TerminationReason::Stopped => {}
                ref reason if reason.is_failure() => {
                    self.status = format!("Capture on {} failed: {}", report.device, reason);
                }
                ref reason => {
                    self.status = format!(
                        "Capture on {} ended ({}), press 'c' to restart",
                        report.device, reason
                    );
                }
            }
            self.reports.push(report);
        }
    }

    fn handle_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('p') => match self.controller.state() {
                Some(SessionState::Running) if self.controller.pause() => {
                    self.status = "Paused: frames are read and discarded".to_string();
                }
                Some(SessionState::Paused) if self.controller.resume() => {
                    self.status = format!("Capturing on {}", self.device);
                }
                _ => self.status = "No running capture".to_string(),
            },
            KeyCode::Char('s') => {
                self.status = if self.controller.stop() {
                    "Stopped, press 'c' to start again".to_string()
                } else {
                    "No running capture".to_string()
                };
            }
            KeyCode::Char('c') => self.start(),
            KeyCode::Down | KeyCode::Char('j') => self.select_offset(1),
            KeyCode::Up | KeyCode::Char('k') => self.select_offset(-1),
            KeyCode::End => {
                let last = self.recent.len().checked_sub(1);
                self.list_state.select(last);
            }
            KeyCode::Esc => self.list_state.select(None),
            _ => {}
        }
    }

    fn select_offset(&mut self, offset: isize) {
        if self.recent.is_empty() {
            return;
        }
        let last = self.recent.len() - 1;
        let next = match self.list_state.selected() {
            Some(current) => current.saturating_add_signed(offset).min(last),
            None => last,
        };
        self.list_state.select(Some(next));
    }

    fn selected(&self) -> Option<&PacketSummary> {
        self.list_state.selected().and_then(|i| self.recent.get(i))
    }

    fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3),      // Header
                Constraint::Percentage(60), // Packet list
                Constraint::Min(5),         // Detail
                Constraint::Length(3),      // Footer
            ])
            .split(f.size());

        self.draw_header(f, chunks[0]);
        self.draw_packets(f, chunks[1]);
        self.draw_detail(f, chunks[2]);
        self.draw_footer(f, chunks[3]);
    }

    fn draw_header(&self, f: &mut Frame, area: Rect) {
        let (state, color) = match self.controller.state() {
            Some(SessionState::Running) => ("RUNNING", Color::Green),
            Some(SessionState::Paused) => ("PAUSED", Color::Yellow),
            Some(SessionState::Stopped) | None => ("STOPPED", Color::Red),
        };

        let mut protocols: Vec<_> = self.protocol_counts.iter().collect();
        protocols.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let protocols = protocols
            .iter()
            .take(4)
            .map(|(label, count)| format!("{} {}", label, count))
            .collect::<Vec<_>>()
            .join("  ");

        let span_secs = match (self.first_seen, self.last_seen) {
            (Some(first), Some(last)) => (last - first).num_seconds().max(0) as u64,
            _ => 0,
        };

        let line = Line::from(vec![
            Span::styled(
                format!(" {} ", state),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(
                "| {} | filter '{}' | {} packets, {} over {} | {}",
                self.device,
                self.controller.filter(),
                self.packets_seen,
                format_bytes(self.bytes_seen),
                format_duration(span_secs),
                protocols
            )),
        ]);

        let header = Paragraph::new(line)
            .block(Block::default().borders(Borders::ALL).title("Packet Streamer"))
            .alignment(Alignment::Left);
        f.render_widget(header, area);
    }

    fn draw_packets(&mut self, f: &mut Frame, area: Rect) {
        let width = area.width.saturating_sub(16) as usize;
        // follow the tail unless the user picked a row
        let skip = match self.list_state.selected() {
            Some(_) => 0,
            None => self
                .recent
                .len()
                .saturating_sub(area.height.saturating_sub(2) as usize),
        };
        let items: Vec<ListItem> = self
            .recent
            .iter()
            .skip(skip)
            .map(|packet| {
                let style = match packet.protocol_label() {
                    "TCP" => Style::default().fg(Color::Cyan),
                    "UDP" => Style::default().fg(Color::Green),
                    "ICMP" => Style::default().fg(Color::Magenta),
                    _ => Style::default().fg(Color::White),
                };
                ListItem::new(Line::from(vec![
                    Span::styled(
                        packet.captured_at().format("%H:%M:%S%.3f ").to_string(),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(truncate_string(packet.descriptive_text(), width), style),
                ]))
            })
            .collect();

        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title("Packets"))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

        f.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn draw_detail(&self, f: &mut Frame, area: Rect) {
        let text = match self.selected() {
            Some(packet) => {
                let mut lines = vec![
                    format!("id        {}", packet.id()),
                    format!("captured  {}", packet.captured_at().to_rfc3339()),
                    format!(
                        "link      {} -> {}",
                        packet.source_mac(),
                        packet.dest_mac()
                    ),
                    format!(
                        "ports     {} -> {}   seq {}",
                        packet.source_port(),
                        packet.dest_port(),
                        packet.sequence_number()
                    ),
                ];
                lines.extend(packet.layer_dump().lines().map(str::to_string));
                lines.join("\n")
            }
            None => "Up/Down to select a packet".to_string(),
        };

        let detail = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title("Detail"))
            .wrap(Wrap { trim: false });
        f.render_widget(detail, area);
    }

    fn draw_footer(&self, f: &mut Frame, area: Rect) {
        let help = "q quit | p pause/resume | s stop | c start | Up/Down select | Esc follow";
        let footer = Paragraph::new(format!("{} | {}", help, self.status))
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Center);
        f.render_widget(footer, area);
    }
}
