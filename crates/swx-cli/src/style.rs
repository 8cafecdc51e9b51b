use std::env;

use swx_core::CommandStatus;

const GREEN: &str = "\x1b[32;1m";
const YELLOW: &str = "\x1b[33;1m";
const RED: &str = "\x1b[31;1m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

pub struct Style {
    enabled: bool,
}

impl Style {
    pub fn new(force_no_color: bool, is_tty: bool) -> Self {
        let env_no_color = env::var_os("NO_COLOR").is_some();
        Self {
            enabled: !(force_no_color || env_no_color) && is_tty,
        }
    }

    pub fn status(&self, status: &CommandStatus, text: &str) -> String {
        let (symbol, color) = match status {
            CommandStatus::Ok => ("✔", GREEN),
            CommandStatus::UserError => ("✗", YELLOW),
            CommandStatus::Failure => ("✖", RED),
        };
        self.paint(&format!("{symbol} {text}"), color)
    }

    pub fn info(&self, text: &str) -> String {
        self.paint(text, CYAN)
    }

    fn paint(&self, text: &str, color: &str) -> String {
        if self.enabled {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}
