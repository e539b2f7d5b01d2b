//! Terminal output surface.

use std::io::Write;
use std::sync::Mutex;

use keilpilot_core::surface::{ActionButton, OutputSurface};

/// Streams turn output to a writer (stdout by default).
pub struct TerminalSurface<W: Write + Send = std::io::Stdout> {
    out: Mutex<W>,
}

impl TerminalSurface {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self, text: &str) {
        if let Ok(mut out) = self.out.lock() {
            // A closed terminal is not worth failing a turn over
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }
}

/// `[Open build log] open build.log`
pub fn render_button(button: &ActionButton) -> String {
    let mut line = format!("[{}] {}", button.label, button.command);
    for arg in &button.arguments {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

impl<W: Write + Send> OutputSurface for TerminalSurface<W> {
    fn emit_text(&self, text: &str) {
        self.write(text);
    }

    fn emit_action_buttons(&self, buttons: &[ActionButton]) {
        if buttons.is_empty() {
            return;
        }
        let mut block = String::from("\n");
        for button in buttons {
            block.push_str(&render_button(button));
            block.push('\n');
        }
        self.write(&block);
    }
}
