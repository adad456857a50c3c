//! Printers: relayed events rendered for a terminal.

use std::io::{self, Write};

use owo_colors::OwoColorize;

use crate::{
    execution::OutputStream,
    relay::{BridgeEvent, EventPayload},
};

pub struct EventPrinter {
    pub color: bool,
}

impl EventPrinter {
    /// Write one event. Output chunks go to the matching stdio stream verbatim.
    pub fn print(&self, event: &BridgeEvent) {
        match &event.payload {
            EventPayload::Output(chunk) => match chunk.stream {
                OutputStream::Stdout => {
                    print!("{}", chunk.data);
                    io::stdout().flush().ok();
                }
                OutputStream::Stderr => {
                    if self.color {
                        eprint!("{}", chunk.data.red());
                    } else {
                        eprint!("{}", chunk.data);
                    }
                }
            },
            EventPayload::Complete(done) => {
                let line = match done.exit_code {
                    Some(code) => format!("[{}] exited with code {}", event.request_id, code),
                    None => format!("[{}] terminated", event.request_id),
                };
                self.status(&line, done.exit_code == Some(0));
            }
            EventPayload::Error(err) => {
                self.status(&format!("[{}] error: {}", event.request_id, err.error), false);
            }
        }
    }

    pub fn status(&self, line: &str, ok: bool) {
        match (self.color, ok) {
            (true, true) => eprintln!("{}", line.green()),
            (true, false) => eprintln!("{}", line.yellow()),
            (false, _) => eprintln!("{}", line),
        }
    }
}
