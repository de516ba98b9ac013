//! Interactive playback: raw-mode terminal loop rendering the contraption
//! while pacing simulation cycles.

use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use marbleworks_core::Contraption;
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Paragraph},
};

const MIN_STEP_INTERVAL: Duration = Duration::from_millis(15);
const MAX_STEP_INTERVAL: Duration = Duration::from_secs(4);
const POLL_CAP: Duration = Duration::from_millis(100);
const OUTPUT_TAIL_LINES: usize = 6;

/// Run the interactive playback loop until the user quits.
///
/// Pacing between cycles is entirely a host concern; the engine itself is
/// stepped synchronously from this loop.
pub fn run_playback(contraption: &mut Contraption, interval: Duration) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, contraption, interval);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    contraption: &mut Contraption,
    mut interval: Duration,
) -> Result<()> {
    let mut paused = false;
    let mut last_step = Instant::now();

    loop {
        terminal.draw(|frame| draw(frame, contraption, paused, interval))?;

        let until_step = interval.saturating_sub(last_step.elapsed());
        if event::poll(until_step.min(POLL_CAP))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                KeyCode::Char(' ') => paused = !paused,
                KeyCode::Char('.') => {
                    contraption.step();
                    last_step = Instant::now();
                }
                KeyCode::Char('+') => {
                    interval = (interval / 2).max(MIN_STEP_INTERVAL);
                }
                KeyCode::Char('-') => {
                    interval = interval.saturating_mul(2).min(MAX_STEP_INTERVAL);
                }
                _ => {}
            }
        }

        if !paused && last_step.elapsed() >= interval {
            contraption.step();
            last_step = Instant::now();
        }
    }
    Ok(())
}

fn draw(frame: &mut Frame, contraption: &Contraption, paused: bool, interval: Duration) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(4),
            Constraint::Length(OUTPUT_TAIL_LINES as u16 + 2),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let grid = Paragraph::new(contraption.render())
        .block(Block::default().borders(Borders::ALL).title("contraption"));
    frame.render_widget(grid, layout[0]);

    let mut tail: Vec<Line> = contraption
        .output()
        .lines()
        .rev()
        .take(OUTPUT_TAIL_LINES)
        .map(Line::from)
        .collect();
    tail.reverse();
    let output = Paragraph::new(tail)
        .block(Block::default().borders(Borders::ALL).title("output"));
    frame.render_widget(output, layout[1]);

    let state = if paused { "paused" } else { "running" };
    let status = format!(
        "cycle {} | marbles {} | {} | {} ms/step | space pause, . step, +/- speed, q quit",
        contraption.cycles(),
        contraption.marble_count(),
        state,
        interval.as_millis(),
    );
    let status = Paragraph::new(status)
        .style(Style::default().add_modifier(Modifier::DIM))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status, layout[2]);
}
