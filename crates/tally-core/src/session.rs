//! Line-summing session state machine.
//!
//! Text arrives in arbitrary chunks. Complete lines are parsed as integers
//! and added to a running total; the unterminated tail is kept until more
//! data arrives. Any termination trigger reports the total and asks the
//! channel to close.

use crate::channel::SessionChannel;
use crate::error::LineError;
use tracing::{debug, trace};

/// Prompt written to a freshly opened session.
pub const PROMPT: &str = "Enter numbers one per line, or EOF when done:\n";

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting data.
    Active,
    /// Total reported and close requested.
    Terminated,
}

/// Optional bounds applied to a session's input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionLimits {
    /// Maximum bytes in one line, excluding the newline. `None` is unbounded.
    pub max_line_length: Option<usize>,
}

/// One interactive summing session bound to a channel.
pub struct LineSession<C> {
    channel: C,
    pending: String,
    total: i128,
    state: SessionState,
    limits: SessionLimits,
    /// Set after an overlong line was dropped; input is skipped up to the next newline.
    discarding: bool,
}

impl<C: SessionChannel> LineSession<C> {
    /// Create an unbounded session writing to `channel`.
    pub fn new(channel: C) -> Self {
        Self::with_limits(channel, SessionLimits::default())
    }

    pub fn with_limits(channel: C, limits: SessionLimits) -> Self {
        Self {
            channel,
            pending: String::new(),
            total: 0,
            state: SessionState::Active,
            limits,
            discarding: false,
        }
    }

    /// Feed a chunk of input.
    ///
    /// Every newline-terminated line is evaluated in order; the trailing
    /// fragment becomes the new pending buffer. Bad lines are reported on the
    /// error stream and never stop the session.
    pub fn on_data(&mut self, chunk: &str) {
        if self.state == SessionState::Terminated {
            debug!(len = chunk.len(), "data after termination ignored");
            return;
        }

        let mut rest = chunk;
        while let Some(idx) = rest.find('\n') {
            let head = &rest[..idx];
            rest = &rest[idx + 1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }

            self.pending.push_str(head);
            let line = std::mem::take(&mut self.pending);
            match self.limits.max_line_length {
                Some(max) if line.len() > max => self.report(LineError::TooLong(max)),
                _ => self.evaluate(&line),
            }
        }

        if self.discarding {
            return;
        }
        self.pending.push_str(rest);
        if let Some(max) = self.limits.max_line_length {
            if self.pending.len() > max {
                self.pending.clear();
                self.discarding = true;
                self.report(LineError::TooLong(max));
            }
        }
    }

    /// Clean end of input. Returns `false`: nothing more should be read.
    pub fn on_eof(&mut self) -> bool {
        self.terminate();
        false
    }

    /// Break from the client. Handled exactly like end of input.
    pub fn on_break(&mut self, msec: u64) -> bool {
        trace!(msec, "break received");
        self.terminate();
        false
    }

    /// In-band end-of-input marker. Reports the total like `on_eof`.
    pub fn on_soft_eof(&mut self) {
        self.terminate();
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Sum of all lines accepted so far.
    pub fn total(&self) -> i128 {
        self.total
    }

    /// Input received since the last newline.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn evaluate(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        match parse_line(line) {
            Ok(value) => self.total += i128::from(value),
            Err(e) => self.report(e),
        }
    }

    fn report(&mut self, err: LineError) {
        debug!(error = %err, "rejected line");
        self.channel.write_error(&format!("{err}\n"));
    }

    /// Report the total and request close. Repeated calls resend both.
    fn terminate(&mut self) {
        if !self.pending.is_empty() {
            debug!(len = self.pending.len(), "discarding unterminated input");
            self.pending.clear();
        }
        self.discarding = false;
        self.channel
            .write_output(&format!("Total = {}\n", self.total));
        self.channel.request_close(0);
        self.state = SessionState::Terminated;
    }
}

/// Parse one line as a base-10 `i64`, ignoring surrounding whitespace.
///
/// The error carries the line exactly as received.
pub fn parse_line(line: &str) -> Result<i64, LineError> {
    line.trim()
        .parse::<i64>()
        .map_err(|_| LineError::InvalidNumber(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::RecordingChannel;

    fn session() -> LineSession<RecordingChannel> {
        LineSession::new(RecordingChannel::default())
    }

    fn total_after(chunks: &[&str]) -> i128 {
        let mut s = session();
        for c in chunks {
            s.on_data(c);
        }
        s.total()
    }

    #[test]
    fn sums_across_chunks() {
        let mut s = session();
        s.on_data("3\n4\n");
        s.on_data("5\n");
        assert!(!s.on_eof());

        let ch = s.channel();
        assert_eq!(ch.output, vec!["Total = 12\n"]);
        assert!(ch.errors.is_empty());
        assert_eq!(ch.closes, vec![0]);
        assert_eq!(s.state(), SessionState::Terminated);
    }

    #[test]
    fn invalid_line_reported_and_skipped() {
        let mut s = session();
        s.on_data("3\nabc\n4\n");
        s.on_eof();

        let ch = s.channel();
        assert_eq!(ch.errors, vec!["Invalid number: abc\n"]);
        assert_eq!(ch.output, vec!["Total = 7\n"]);
    }

    #[test]
    fn unterminated_fragment_discarded_at_eof() {
        let mut s = session();
        s.on_data("10");
        assert_eq!(s.pending(), "10");
        s.on_eof();

        let ch = s.channel();
        assert_eq!(ch.output, vec!["Total = 0\n"]);
        assert!(ch.errors.is_empty());
        assert_eq!(s.pending(), "");
    }

    #[test]
    fn break_reports_like_eof() {
        let mut s = session();
        s.on_data("5\n");
        assert!(!s.on_break(250));

        let ch = s.channel();
        assert_eq!(ch.output, vec!["Total = 5\n"]);
        assert_eq!(ch.closes, vec![0]);
    }

    #[test]
    fn all_triggers_report_same_total() {
        let input = "1\n2\nx\n-4\n7";
        let mut outputs = Vec::new();

        let mut a = session();
        a.on_data(input);
        a.on_eof();
        outputs.push(a.channel().output.clone());

        let mut b = session();
        b.on_data(input);
        b.on_break(0);
        outputs.push(b.channel().output.clone());

        let mut c = session();
        c.on_data(input);
        c.on_soft_eof();
        outputs.push(c.channel().output.clone());

        for out in &outputs {
            assert_eq!(out, &vec!["Total = -1\n".to_string()]);
        }
    }

    #[test]
    fn chunk_boundaries_do_not_change_total() {
        let input = "12\n-7\n\n300\nnope\n45\n9";
        let whole = total_after(&[input]);
        assert_eq!(whole, 350);

        let bytes: Vec<&str> = (0..input.len()).map(|i| &input[i..i + 1]).collect();
        assert_eq!(total_after(&bytes), whole);

        for split in 0..=input.len() {
            let (left, right) = input.split_at(split);
            assert_eq!(total_after(&[left, right]), whole, "split at {split}");
        }
    }

    #[test]
    fn number_split_across_chunks() {
        let mut s = session();
        s.on_data("1");
        s.on_data("2");
        s.on_data("3\n");
        assert_eq!(s.total(), 123);
        assert!(s.channel().errors.is_empty());
    }

    #[test]
    fn empty_lines_are_silent() {
        let mut s = session();
        s.on_data("\n\n5\n\n\n");
        assert_eq!(s.total(), 5);
        assert!(s.channel().errors.is_empty());
    }

    #[test]
    fn one_error_per_bad_line_with_original_text() {
        let mut s = session();
        s.on_data("1\n two \n3x\n99999999999999999999\n2\n");
        assert_eq!(s.total(), 3);
        assert_eq!(
            s.channel().errors,
            vec![
                "Invalid number:  two \n",
                "Invalid number: 3x\n",
                "Invalid number: 99999999999999999999\n",
            ]
        );
    }

    #[test]
    fn whitespace_and_signs_accepted() {
        let mut s = session();
        s.on_data("+4\r\n -2 \n");
        assert_eq!(s.total(), 2);
        assert!(s.channel().errors.is_empty());
    }

    #[test]
    fn whitespace_only_line_is_an_error() {
        let mut s = session();
        s.on_data(" \n");
        assert_eq!(s.channel().errors, vec!["Invalid number:  \n"]);
    }

    #[test]
    fn total_exceeds_i64() {
        let mut s = session();
        let line = format!("{}\n", i64::MAX);
        s.on_data(&line);
        s.on_data(&line);
        assert_eq!(s.total(), 2 * i128::from(i64::MAX));
    }

    #[test]
    fn no_output_before_termination() {
        let mut s = session();
        s.on_data("1\nbad\n2\n");
        assert!(s.channel().output.is_empty());
        assert!(s.channel().closes.is_empty());
        assert_eq!(s.state(), SessionState::Active);
    }

    #[test]
    fn repeated_eof_resends_total() {
        let mut s = session();
        s.on_data("8\n");
        s.on_eof();
        s.on_eof();
        assert_eq!(s.channel().output, vec!["Total = 8\n", "Total = 8\n"]);
        assert_eq!(s.channel().closes, vec![0, 0]);
    }

    #[test]
    fn data_after_termination_ignored() {
        let mut s = session();
        s.on_data("1\n");
        s.on_soft_eof();
        s.on_data("2\nbad\n");
        assert_eq!(s.total(), 1);
        assert!(s.channel().errors.is_empty());
        assert!(s.pending().is_empty());
    }

    #[test]
    fn overlong_pending_line_dropped_until_newline() {
        let limits = SessionLimits {
            max_line_length: Some(4),
        };
        let mut s = LineSession::with_limits(RecordingChannel::default(), limits);
        s.on_data("12");
        s.on_data("345");
        assert_eq!(s.pending(), "");
        s.on_data("678\n9\n");
        s.on_eof();

        let ch = s.channel();
        assert_eq!(ch.errors, vec!["Line too long: exceeded 4 bytes\n"]);
        assert_eq!(ch.output, vec!["Total = 9\n"]);
    }

    #[test]
    fn overlong_complete_line_rejected() {
        let limits = SessionLimits {
            max_line_length: Some(3),
        };
        let mut s = LineSession::with_limits(RecordingChannel::default(), limits);
        s.on_data("1234\n123\n");
        assert_eq!(s.total(), 123);
        assert_eq!(s.channel().errors, vec!["Line too long: exceeded 3 bytes\n"]);
    }

    #[test]
    fn parse_line_keeps_original_text() {
        assert_eq!(parse_line(" 42 "), Ok(42));
        assert_eq!(
            parse_line("4 2"),
            Err(LineError::InvalidNumber("4 2".into()))
        );
    }
}
