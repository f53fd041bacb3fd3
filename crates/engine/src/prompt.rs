use std::collections::VecDeque;
use std::io::{self, Write};

/// Operator interaction boundary. All confirmation and selection prompts go
/// through here so flows stay testable; an interrupted or failed read is
/// treated as declining, never as a crash.
pub trait Prompter {
    /// Yes/no question. Returns `default` on empty input and `false` when
    /// input cannot be read (EOF, interrupt).
    fn confirm(&mut self, message: &str, default: bool) -> bool;

    /// Free-form line of input. `None` when input cannot be read.
    fn line(&mut self, message: &str) -> Option<String>;
}

/// Interactive prompter over stdin/stdout.
#[derive(Default)]
pub struct StdinPrompter;

impl StdinPrompter {
    fn read_trimmed(prompt: &str) -> Option<String> {
        print!("{prompt}");
        io::stdout().flush().ok();
        let mut buf = String::new();
        match io::stdin().read_line(&mut buf) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(buf.trim().to_string()),
        }
    }
}

impl Prompter for StdinPrompter {
    fn confirm(&mut self, message: &str, default: bool) -> bool {
        let options = if default { "Y/n" } else { "y/N" };
        loop {
            let Some(input) = Self::read_trimmed(&format!("{message} [{options}] ")) else {
                return false;
            };
            match input.to_lowercase().as_str() {
                "" => return default,
                "y" => return true,
                "n" => return false,
                _ => continue,
            }
        }
    }

    fn line(&mut self, message: &str) -> Option<String> {
        Self::read_trimmed(&format!("{message} "))
    }
}

/// Scripted prompter for tests: answers are consumed front to back; once
/// exhausted, every prompt reads as declined/empty.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    pub transcript: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedPrompter {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&mut self, message: &str, default: bool) -> bool {
        self.transcript.push(message.to_string());
        match self.answers.pop_front().as_deref() {
            Some("y") | Some("Y") => true,
            Some("") => default,
            Some(_) => false,
            None => false,
        }
    }

    fn line(&mut self, message: &str) -> Option<String> {
        self.transcript.push(message.to_string());
        self.answers.pop_front()
    }
}
