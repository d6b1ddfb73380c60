use std::io::{self, Write};
use std::time::Duration;

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, ClearType},
};

use crate::fsm::{Tone, UserAction};
use crate::runtime::{Command, Display, Keypad};

const PIN_LENGTH: usize = 4;
const BAR_WIDTH: usize = 30;

/// Puts the terminal in raw mode for as long as it lives.
pub struct RawTerminal;

impl RawTerminal {
    pub fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(io::stdout(), terminal::Clear(ClearType::All), cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), ResetColor, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

fn tone_color(tone: Tone) -> Color {
    match tone {
        Tone::Neutral => Color::White,
        Tone::Info => Color::Cyan,
        Tone::Success => Color::Green,
        Tone::Warning => Color::Yellow,
        Tone::Error => Color::Red,
    }
}

pub fn progress_bar(fraction: f32) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * BAR_WIDTH as f32).round()) as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        fraction.clamp(0.0, 1.0) * 100.0
    )
}

/// Line-based kiosk screen: top line, message, buttons, progress.
#[derive(Default)]
pub struct TerminalDisplay {
    top: String,
    center: String,
    tone: Option<Tone>,
    buttons: (Option<String>, Option<String>),
    progress: Option<f32>,
}

impl TerminalDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    fn redraw(&self) {
        if let Err(e) = self.try_redraw() {
            tracing::debug!("terminal redraw failed: {}", e);
        }
    }

    fn try_redraw(&self) -> io::Result<()> {
        let mut out = io::stdout();
        queue!(out, cursor::MoveTo(0, 0), terminal::Clear(ClearType::All))?;
        queue!(out, SetForegroundColor(Color::DarkGrey), Print(&self.top), ResetColor)?;

        let color = tone_color(self.tone.unwrap_or(Tone::Neutral));
        queue!(out, cursor::MoveTo(2, 2), SetForegroundColor(color), Print(&self.center), ResetColor)?;

        let mut row = 4;
        if let Some(fraction) = self.progress {
            queue!(out, cursor::MoveTo(2, row), Print(progress_bar(fraction)))?;
            row += 2;
        }

        let (primary, secondary) = &self.buttons;
        let mut labels = Vec::new();
        if let Some(label) = primary {
            labels.push(format!("[1] {}", label));
        }
        if let Some(label) = secondary {
            labels.push(format!("[2] {}", label));
        }
        if !labels.is_empty() {
            queue!(out, cursor::MoveTo(2, row), Print(labels.join("   ")))?;
        }

        queue!(
            out,
            cursor::MoveTo(0, row + 2),
            SetForegroundColor(Color::DarkGrey),
            Print("p: PIN  g: guest  r: recalibrate  q: quit"),
            ResetColor
        )?;
        out.flush()
    }
}

impl Display for TerminalDisplay {
    fn show(&mut self, top: &str, center: &str, tone: Tone) {
        self.top = top.to_string();
        self.center = center.to_string();
        self.tone = Some(tone);
        self.redraw();
    }

    fn show_buttons(&mut self, primary: Option<&str>, secondary: Option<&str>) {
        self.buttons = (primary.map(str::to_string), secondary.map(str::to_string));
        self.redraw();
    }

    fn progress(&mut self, fraction: Option<f32>) {
        self.progress = fraction;
        self.redraw();
    }
}

pub fn command_for_key(key: KeyEvent) -> Option<Command> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Command::Quit),
        KeyCode::Char('q') | KeyCode::Esc => Some(Command::Quit),
        KeyCode::Char('p') => Some(Command::Action(UserAction::RequestPin)),
        KeyCode::Char('g') => Some(Command::Action(UserAction::Guest)),
        KeyCode::Char('1') => Some(Command::Action(UserAction::Primary)),
        KeyCode::Char('2') => Some(Command::Action(UserAction::Secondary)),
        KeyCode::Char('r') => Some(Command::Recalibrate),
        _ => None,
    }
}

/// Keyboard standing in for the kiosk's keypad.
pub struct TerminalKeypad;

impl TerminalKeypad {
    fn read_key(&self) -> io::Result<KeyEvent> {
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Release {
                    return Ok(key);
                }
            }
        }
    }

    fn draw_pin(&self, entered: usize) -> io::Result<()> {
        let mask = format!("{}{}", "*".repeat(entered), "_".repeat(PIN_LENGTH - entered));
        let mut out = io::stdout();
        execute!(
            out,
            cursor::MoveTo(2, 4),
            terminal::Clear(ClearType::CurrentLine),
            Print(format!("PIN: {}   (Enter to confirm, Esc to cancel)", mask))
        )
    }

    fn read_pin(&self) -> io::Result<Option<String>> {
        let mut pin = String::new();
        self.draw_pin(0)?;
        loop {
            let key = self.read_key()?;
            match key.code {
                KeyCode::Esc => return Ok(None),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(None),
                KeyCode::Char(c) if c.is_ascii_digit() && pin.len() < PIN_LENGTH => pin.push(c),
                KeyCode::Backspace => {
                    pin.pop();
                }
                KeyCode::Enter if pin.len() == PIN_LENGTH => return Ok(Some(pin)),
                _ => {}
            }
            self.draw_pin(pin.len())?;
        }
    }
}

impl Keypad for TerminalKeypad {
    fn request_pin(&mut self) -> Option<String> {
        match self.read_pin() {
            Ok(pin) => pin,
            Err(e) => {
                tracing::warn!("PIN entry failed: {}", e);
                None
            }
        }
    }

    fn poll(&mut self) -> Option<Command> {
        match event::poll(Duration::from_millis(0)) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) => command_for_key(key),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!("key read failed: {}", e);
                    None
                }
            },
            Ok(false) => None,
            Err(e) => {
                tracing::debug!("key poll failed: {}", e);
                None
            }
        }
    }
}
