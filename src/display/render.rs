//! Frame rendering for the status display.
//!
//! One frame is a title bar with the remaining time, one panel per running
//! agent, and a stats panel with queue counts. Rendering is a pure function
//! of a [`DisplaySnapshot`], so it can be exercised against a `TestBackend`.

use std::time::Duration;

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use crate::agents::{AgentState, AgentStatus, Side};
use crate::store::{QueueCounts, StoreStats};

/// Recent actions shown per panel when several agents share the screen.
pub const ACTIONS_PER_PANEL: usize = 3;
/// Recent actions shown when a single agent has the whole screen.
pub const ACTIONS_SINGLE_AGENT: usize = 6;

/// Everything one frame shows.
#[derive(Debug, Clone)]
pub struct DisplaySnapshot {
    pub resolution: String,
    pub side: Side,
    pub remaining: Duration,
    pub agents: Vec<AgentState>,
    pub stats: StoreStats,
}

/// Formats a duration as `M:SS`.
pub fn format_time_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

pub fn status_color(status: AgentStatus) -> Color {
    match status {
        AgentStatus::Working => Color::Green,
        AgentStatus::Checking => Color::Yellow,
        AgentStatus::Waiting => Color::Blue,
        AgentStatus::Idle => Color::DarkGray,
        AgentStatus::Stopped => Color::Red,
        AgentStatus::Starting => Color::Cyan,
    }
}

/// Draws one frame.
pub fn draw(f: &mut Frame, snapshot: &DisplaySnapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(4),
        ])
        .split(f.area());

    draw_title(f, chunks[0], snapshot);
    draw_agents(f, chunks[1], &snapshot.agents);
    draw_stats(f, chunks[2], &snapshot.stats);
}

fn draw_title(f: &mut Frame, area: Rect, snapshot: &DisplaySnapshot) {
    let title = format!(
        " Debate Prep │ {} remaining ",
        format_time_remaining(snapshot.remaining)
    );
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));
    let line = Line::from(vec![
        Span::styled(
            format!("{} ", snapshot.side.as_str().to_uppercase()),
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        ),
        Span::raw(snapshot.resolution.clone()),
    ]);
    f.render_widget(Paragraph::new(line).block(block), area);
}

fn draw_agents(f: &mut Frame, area: Rect, agents: &[AgentState]) {
    if agents.is_empty() {
        return;
    }
    if agents.len() == 1 {
        draw_agent_panel(f, area, &agents[0], ACTIONS_SINGLE_AGENT);
        return;
    }

    // Two columns, as many rows as needed.
    let rows = agents.len().div_ceil(2);
    let row_areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, rows as u32); rows])
        .split(area);

    for (row, pair) in agents.chunks(2).enumerate() {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
            .split(row_areas[row]);
        for (col, agent) in pair.iter().enumerate() {
            draw_agent_panel(f, cols[col], agent, ACTIONS_PER_PANEL);
        }
    }
}

fn draw_agent_panel(f: &mut Frame, area: Rect, agent: &AgentState, max_actions: usize) {
    let color = status_color(agent.status);
    let mut status_style = Style::default().fg(color);
    if agent.status == AgentStatus::Idle {
        status_style = status_style.add_modifier(Modifier::DIM);
    }

    let block = Block::default()
        .title(Line::from(vec![
            Span::styled(
                format!(" {} ", agent.name.to_uppercase()),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("[{}] ", agent.status), status_style),
        ]))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));

    let mut lines: Vec<Line> = Vec::new();
    if !agent.current_direction.is_empty() {
        lines.push(Line::from(Span::styled(
            agent.current_direction.clone(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        )));
    }

    let skip = agent.recent_actions.len().saturating_sub(max_actions);
    for action in agent.recent_actions.iter().skip(skip) {
        lines.push(Line::from(vec![
            Span::styled("• ", Style::default().fg(color)),
            Span::raw(action.clone()),
        ]));
    }

    lines.push(Line::from(Span::styled(
        format!(
            "Processed: {} | Created: {}",
            agent.items_processed, agent.items_created
        ),
        Style::default().fg(Color::Gray),
    )));

    let sources = agent.counters;
    if sources.urls_collected > 0 || sources.sources_fetched > 0 || sources.sources_failed > 0 {
        lines.push(Line::from(Span::styled(
            format!(
                "Sources: {} fetched, {} failed, {} urls",
                sources.sources_fetched, sources.sources_failed, sources.urls_collected
            ),
            Style::default().fg(Color::Gray),
        )));
    }

    if let Some(err) = &agent.last_error {
        lines.push(Line::from(Span::styled(
            format!("Last error: {}", err.chars().take(80).collect::<String>()),
            Style::default().fg(Color::Red),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn queue_cell(label: &str, counts: QueueCounts) -> Vec<Span<'static>> {
    vec![
        Span::styled(format!("{}: ", label), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!("{} ", counts.total)),
        Span::styled(format!("({} done", counts.done), Style::default().fg(Color::Green)),
        Span::raw(", "),
        Span::styled(format!("{} failed)", counts.failed), Style::default().fg(Color::Red)),
        Span::raw("   "),
    ]
}

fn draw_stats(f: &mut Frame, area: Rect, stats: &StoreStats) {
    let block = Block::default()
        .title(" Stats ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let mut first = queue_cell("Tasks", stats.tasks);
    first.extend(queue_cell("Search Results", stats.results));
    let mut second = queue_cell("Cards Cut", stats.cards);
    second.extend(queue_cell("Feedback", stats.feedback));

    let paragraph = Paragraph::new(vec![Line::from(first), Line::from(second)]).block(block);
    f.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentStateHandle;
    use ratatui::{backend::TestBackend, buffer::Buffer, Terminal};

    fn buffer_text(buffer: &Buffer) -> String {
        let width = buffer.area.width as usize;
        buffer
            .content
            .chunks(width)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render(snapshot: &DisplaySnapshot) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| draw(f, snapshot)).unwrap();
        buffer_text(terminal.backend().buffer())
    }

    fn snapshot(agents: Vec<AgentState>) -> DisplaySnapshot {
        DisplaySnapshot {
            resolution: "Resolved: tariffs do more harm than good".to_string(),
            side: Side::Pro,
            remaining: Duration::from_secs(125),
            agents,
            stats: StoreStats::default(),
        }
    }

    #[test]
    fn test_format_time_remaining() {
        assert_eq!(format_time_remaining(Duration::from_secs(0)), "0:00");
        assert_eq!(format_time_remaining(Duration::from_secs(65)), "1:05");
        assert_eq!(format_time_remaining(Duration::from_millis(600_900)), "10:00");
    }

    #[test]
    fn test_status_colors() {
        assert_eq!(status_color(AgentStatus::Working), Color::Green);
        assert_eq!(status_color(AgentStatus::Checking), Color::Yellow);
        assert_eq!(status_color(AgentStatus::Waiting), Color::Blue);
        assert_eq!(status_color(AgentStatus::Stopped), Color::Red);
        assert_eq!(status_color(AgentStatus::Starting), Color::Cyan);
    }

    #[test]
    fn test_title_and_panels() {
        let strategy = AgentStateHandle::new("strategy");
        strategy.set_status(AgentStatus::Working);
        strategy.set_direction("Generating answers to opponent arguments");
        let search = AgentStateHandle::new("search");
        search.record_processed();
        search.record_created(2);

        let text = render(&snapshot(vec![strategy.snapshot(), search.snapshot()]));
        assert!(text.contains("2:05 remaining"));
        assert!(text.contains("STRATEGY"));
        assert!(text.contains("[working]"));
        assert!(text.contains("Generating answers to opponent arguments"));
        assert!(text.contains("Processed: 1 | Created: 2"));
        assert!(text.contains("Search Results: 0"));
        assert!(text.contains("Cards Cut: 0"));
    }

    #[test]
    fn test_recent_actions_limit() {
        let cutter = AgentStateHandle::new("cutter");
        for i in 1..=6 {
            cutter.push_action(format!("action-{}", i));
        }
        let organizer = AgentStateHandle::new("organizer");

        let text = render(&snapshot(vec![cutter.snapshot(), organizer.snapshot()]));
        assert!(!text.contains("action-3"));
        assert!(text.contains("action-4"));
        assert!(text.contains("action-6"));

        let text = render(&snapshot(vec![cutter.snapshot()]));
        assert!(text.contains("action-1"));
        assert!(text.contains("action-6"));
    }
}
