//! Interactive terminal input handling.

/// What a line typed at the prompt means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand<'a> {
    Exit,
    Clear,
    Empty,
    Forward(&'a str),
}

impl<'a> ReplCommand<'a> {
    pub fn parse(line: &'a str) -> Self {
        match line.trim() {
            "exit" | "exit()" => ReplCommand::Exit,
            // The engine's own clc has no effect on our terminal
            "clc" | "clc()" => ReplCommand::Clear,
            "" => ReplCommand::Empty,
            code => ReplCommand::Forward(code),
        }
    }
}

/// Why the interactive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The user typed an exit keyword.
    ExitKeyword,
    /// Input ended or could not be read.
    EndOfInput,
    /// The session had no engine, so the loop never ran.
    Unavailable,
}
