//! Acknowledgement token matching.
//!
//! The co-processor answers commands with free-form text. An exchange is
//! decided by looking for one of several expected substrings in the text
//! accumulated so far.

/// Line terminator used by the AT command protocol.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Outcome of scanning an acknowledgement buffer.
///
/// The index refers to the position of the matched token in the
/// corresponding token list of the [`AckMatcher`].
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Verdict {
    /// A success token was found.
    Success(usize),
    /// A failure token was found on a completed line and no success token matched.
    Failure(usize),
}

/// Ordered set of success and failure tokens for a single exchange.
///
/// Success tokens are always evaluated first, in registration order.
/// A failure token only counts at the start of a line, so the module's echo of
/// the command never rejects it. It decides the exchange once its line has been
/// terminated, so that a benign failure code completing on a later chunk
/// (e.g. `+TCDEVREG:FAIL,1021`) can still be recognized as success.
#[derive(Copy, Clone, Debug)]
pub struct AckMatcher<'a> {
    success: &'a [&'a str],
    failure: &'a [&'a str],
}

impl<'a> AckMatcher<'a> {
    /// Constructs a matcher from ordered token lists.
    #[must_use]
    pub fn new(success: &'a [&'a str], failure: &'a [&'a str]) -> Self {
        Self { success, failure }
    }

    /// Scans the accumulated acknowledgement text.
    ///
    /// Returns [`None`] while the exchange is still undecided.
    #[must_use]
    pub fn scan(&self, ack: &[u8]) -> Option<Verdict> {
        if let Some(idx) = self
            .success
            .iter()
            .position(|token| find(ack, token.as_bytes()).is_some())
        {
            return Some(Verdict::Success(idx));
        }

        self.failure
            .iter()
            .position(|token| {
                line_starts(ack, token.as_bytes())
                    .any(|pos| find(&ack[pos + token.len()..], LINE_TERMINATOR).is_some())
            })
            .map(Verdict::Failure)
    }

    /// Returns whether any failure token starts a line, terminated or not.
    #[must_use]
    pub fn saw_failure(&self, ack: &[u8]) -> bool {
        self.failure
            .iter()
            .any(|token| line_starts(ack, token.as_bytes()).next().is_some())
    }
}

/// Returns the positions at which `token` begins a line of `ack`.
fn line_starts<'b>(ack: &'b [u8], token: &'b [u8]) -> impl Iterator<Item = usize> + 'b {
    (0..ack.len())
        .filter(move |&pos| pos == 0 || ack[pos - 1] == b'\n')
        .filter(move |&pos| !token.is_empty() && ack[pos..].starts_with(token))
}

/// Returns the position of the first occurrence of `needle` in `haystack`.
///
/// An empty needle never matches.
#[must_use]
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }

    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTER_OK: &[&str] = &["+TCDEVREG:OK", "+TCDEVREG:FAIL,1021"];
    const REGISTER_FAIL: &[&str] = &["+TCDEVREG:FAIL", "ERROR"];

    #[test]
    fn find_substring() {
        assert_eq!(find(b"abcabc", b"ca"), Some(2), "position should be correct");
        assert_eq!(find(b"abc", b"abcd"), None, "longer needle should not match");
        assert_eq!(find(b"abc", b""), None, "empty needle should not match");
    }

    #[test]
    fn success_token_priority() {
        let matcher = AckMatcher::new(&["B", "A"], &[]);

        assert_eq!(
            matcher.scan(b"xx A yy B"),
            Some(Verdict::Success(0)),
            "first registered token should win"
        );
    }

    #[test]
    fn accepted_failure_code_is_success() {
        let matcher = AckMatcher::new(REGISTER_OK, REGISTER_FAIL);

        assert_eq!(
            matcher.scan(b"AT+TCDEVREG\r\n+TCDEVREG:FAIL,1021\r\n"),
            Some(Verdict::Success(1)),
            "already registered should be treated as success"
        );
    }

    #[test]
    fn failure_waits_for_line_end() {
        let matcher = AckMatcher::new(REGISTER_OK, REGISTER_FAIL);

        assert_eq!(
            matcher.scan(b"+TCDEVREG:FAIL"),
            None,
            "unterminated failure line should stay undecided"
        );
        assert!(
            matcher.saw_failure(b"+TCDEVREG:FAIL"),
            "failure token should still be detected"
        );
        assert_eq!(
            matcher.scan(b"+TCDEVREG:FAIL,1003\r\n"),
            Some(Verdict::Failure(0)),
            "terminated failure line should reject"
        );
    }

    #[test]
    fn echoed_failure_token_is_ignored() {
        let matcher = AckMatcher::new(&["+TCMQTTPUB:OK"], &["+TCMQTTPUB:FAIL", "ERROR"]);
        let echo = b"AT+TCMQTTPUB=\"t\",1,\"{\\\"params\\\":{\\\"door\\\":\\\"ERROR\\\"}}\"\r\n";

        assert_eq!(matcher.scan(echo), None, "echo should stay undecided");
        assert!(!matcher.saw_failure(echo), "echo should not count as failure");

        let mut ack = echo.to_vec();

        ack.extend_from_slice(b"\r\nERROR\r\n");

        assert_eq!(
            matcher.scan(&ack),
            Some(Verdict::Failure(1)),
            "failure on its own line should reject"
        );
    }

    #[test]
    fn undecided_without_tokens() {
        let matcher = AckMatcher::new(&["OK"], &["ERROR"]);

        assert_eq!(matcher.scan(b"busy p...\r\n"), None, "no verdict expected");
        assert!(!matcher.saw_failure(b"busy p...\r\n"), "no failure expected");
    }
}
