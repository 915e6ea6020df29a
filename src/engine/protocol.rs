//! Line framing for talking to an engine over its stdin/stdout.
//!
//! Every request is a single line that evaluates the user's code inside a
//! `try`/`catch` and then prints a done marker tagged with the request id. When the
//! code fails, an error marker is printed first, followed by the engine's message.

use super::{EngineError, OutputSink};

const ERROR_VAR: &str = "mlterm_err__";

/// Quotes `code` as a MATLAB char expression that fits on one line.
pub fn quote(code: &str) -> String {
    let parts: Vec<String> = code
        .split('\n')
        .map(|p| format!("'{}'", p.trim_end_matches('\r').replace('\'', "''")))
        .collect();
    if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        format!("[{}]", parts.join(" char(10) "))
    }
}

/// Code that runs a script file.
pub fn run_code(script: &str) -> String {
    format!("run({})", quote(script))
}

/// Decodes one raw line without its terminator. Bytes that are not UTF-8 (engines
/// running under a Latin-1 or cp1252 locale) become replacement characters.
pub fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// How a line read back from the engine relates to the current request.
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    Output(&'a str),
    /// Error marker; `before` is output that was missing its trailing newline.
    ErrorStart { before: &'a str },
    Done { before: &'a str },
}

/// Markers for one request id.
#[derive(Debug, Clone)]
pub struct Frame {
    id: u64,
    error_marker: String,
    done_marker: String,
}

impl Frame {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            error_marker: format!("__mlterm_err_{}__", id),
            done_marker: format!("__mlterm_done_{}__", id),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The request line for `code`, without the trailing newline.
    pub fn request(&self, code: &str) -> String {
        format!(
            "try, eval({code}); catch {var}, fprintf('%s\\n', '{err}'); disp({var}.message); end; clear {var}; fprintf('%s\\n', '{done}');",
            code = quote(code),
            var = ERROR_VAR,
            err = self.error_marker,
            done = self.done_marker,
        )
    }

    pub fn classify<'a>(&self, line: &'a str) -> Line<'a> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(before) = line.strip_suffix(self.done_marker.as_str()) {
            Line::Done { before }
        } else if let Some(before) = line.strip_suffix(self.error_marker.as_str()) {
            Line::ErrorStart { before }
        } else {
            Line::Output(line)
        }
    }
}

/// Accumulates the engine's answer to one request.
#[derive(Debug)]
pub struct Reply {
    frame: Frame,
    in_error: bool,
    error: Vec<String>,
}

impl Reply {
    pub fn new(frame: Frame) -> Self {
        Self { frame, in_error: false, error: Vec::new() }
    }

    /// Feeds one stdout line. Returns true once the done marker has been seen.
    pub fn feed(&mut self, line: &str, sink: &mut dyn OutputSink) -> bool {
        match self.frame.classify(line) {
            Line::Output(text) => {
                self.emit(text, sink);
                false
            }
            Line::ErrorStart { before } => {
                if !before.is_empty() {
                    self.emit(before, sink);
                }
                self.in_error = true;
                false
            }
            Line::Done { before } => {
                if !before.is_empty() {
                    self.emit(before, sink);
                }
                true
            }
        }
    }

    fn emit(&mut self, text: &str, sink: &mut dyn OutputSink) {
        if self.in_error {
            self.error.push(text.to_string());
        } else {
            sink.stdout_line(text);
        }
    }

    pub fn finish(self) -> Result<(), EngineError> {
        if self.in_error {
            let message = self.error.join("\n");
            let message = message.trim_end();
            if message.is_empty() {
                return Err(EngineError::Evaluation(format!(
                    "request {} failed without a message",
                    self.frame.id()
                )));
            }
            Err(EngineError::Evaluation(message.to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CapturedOutput;

    #[test]
    fn quote_doubles_single_quotes() {
        assert_eq!(quote("disp('hi')"), "'disp(''hi'')'");
    }

    #[test]
    fn quote_joins_lines_with_char10() {
        assert_eq!(quote("a = 1;\r\nb = 2;"), "['a = 1;' char(10) 'b = 2;']");
    }

    #[test]
    fn run_code_quotes_path() {
        assert_eq!(run_code("/tmp/it's/x.m"), "run('/tmp/it''s/x.m')");
    }

    #[test]
    fn decode_line_strips_terminator_and_replaces_invalid_bytes() {
        assert_eq!(decode_line(b"x = 1\r\n"), "x = 1");
        assert_eq!(decode_line(b"caf\xe9\n"), "caf\u{fffd}");
        assert_eq!(decode_line(b"partial"), "partial");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[test]
    fn request_is_single_line_with_markers() {
        let frame = Frame::new(7);
        let req = frame.request("x = 1\ny = 2");
        assert!(!req.contains('\n'));
        assert!(req.contains("'__mlterm_err_7__'"));
        assert!(req.ends_with("fprintf('%s\\n', '__mlterm_done_7__');"));
    }

    #[test]
    fn classify_splits_unterminated_output_from_marker() {
        let frame = Frame::new(3);
        assert_eq!(frame.classify("abc__mlterm_done_3__"), Line::Done { before: "abc" });
        assert_eq!(frame.classify("__mlterm_err_3__\r"), Line::ErrorStart { before: "" });
        // markers of other requests are plain output
        assert_eq!(frame.classify("__mlterm_done_2__"), Line::Output("__mlterm_done_2__"));
    }

    #[test]
    fn reply_collects_error_message() {
        let mut sink = CapturedOutput::default();
        let mut reply = Reply::new(Frame::new(1));
        assert!(!reply.feed("partial", &mut sink));
        assert!(!reply.feed("__mlterm_err_1__", &mut sink));
        assert!(!reply.feed("Undefined function 'foo'.", &mut sink));
        assert!(reply.feed("__mlterm_done_1__", &mut sink));
        assert_eq!(sink.stdout, vec!["partial"]);
        match reply.finish() {
            Err(EngineError::Evaluation(msg)) => assert_eq!(msg, "Undefined function 'foo'."),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reply_without_error_is_ok() {
        let mut sink = CapturedOutput::default();
        let mut reply = Reply::new(Frame::new(2));
        reply.feed("x =", &mut sink);
        reply.feed("     1", &mut sink);
        assert!(reply.feed("__mlterm_done_2__", &mut sink));
        assert!(reply.finish().is_ok());
        assert_eq!(sink.stdout.len(), 2);
    }
}
