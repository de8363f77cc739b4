// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::time::Duration;

use regex::Regex;

use crate::tailers::file::decoder::{
    AutoMultilineConfig, AutoMultilineDetector, DecodedMessage, Decoder,
};
use crate::tailers::file::error::Result;

/// Newline-framed decoder.
///
/// Content is whitespace-trimmed; blank lines come out as empty messages so
/// the bytes they occupy still count toward the decoded offset. Lines longer
/// than `max_message_size` are split into flagged pieces.
pub struct LineDecoder {
    max_message_size: usize,
    buffer: Vec<u8>,
    /// The last emitted piece was a prefix of an over-long line
    continuing_truncated: bool,
    outputs: VecDeque<DecodedMessage>,
    multiline: Option<Multiline>,
}

/// Aggregation state once auto multi-line detection is enabled.
struct Multiline {
    detector: AutoMultilineDetector,
    pending: Option<DecodedMessage>,
}

impl LineDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size: max_message_size.max(1),
            buffer: Vec::new(),
            continuing_truncated: false,
            outputs: VecDeque::new(),
            multiline: None,
        }
    }

    pub fn with_auto_multiline(mut self, config: AutoMultilineConfig) -> Result<Self> {
        self.multiline = Some(Multiline {
            detector: AutoMultilineDetector::new(config)?,
            pending: None,
        });
        Ok(self)
    }

    fn frame(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        let max = self.max_message_size;
        let mut start = 0;

        loop {
            let rest = &buffer[start..];
            match rest.iter().position(|&b| b == b'\n') {
                Some(pos) if pos <= max => {
                    let truncated = std::mem::take(&mut self.continuing_truncated);
                    self.emit_line(&rest[..pos], pos + 1, truncated);
                    start += pos + 1;
                }
                Some(_) | None if rest.len() > max => {
                    self.emit_line(&rest[..max], max, true);
                    self.continuing_truncated = true;
                    start += max;
                }
                _ => break,
            }
        }

        self.buffer = buffer[start..].to_vec();
    }

    fn emit_line(&mut self, line: &[u8], raw_len: usize, truncated: bool) {
        let content = line.trim_ascii().to_vec();
        let message = DecodedMessage::new(content, raw_len, truncated);

        match self.multiline.as_mut() {
            None => self.outputs.push_back(message),
            Some(multiline) => multiline.accept(message, self.max_message_size, &mut self.outputs),
        }
    }
}

impl Multiline {
    fn accept(
        &mut self,
        message: DecodedMessage,
        max_message_size: usize,
        outputs: &mut VecDeque<DecodedMessage>,
    ) {
        self.detector.observe(&message.content);

        let starts_entry = match self.detector.detected() {
            Some(pattern) => is_start(pattern, &message.content),
            None => {
                self.flush_pending(outputs);
                outputs.push_back(message);
                return;
            }
        };

        if message.truncated {
            self.flush_pending(outputs);
            outputs.push_back(message);
            return;
        }

        if starts_entry {
            self.flush_pending(outputs);
            self.pending = Some(message);
            return;
        }

        match self.pending.as_mut() {
            Some(pending) if message.content.is_empty() => {
                pending.raw_data_len += message.raw_data_len;
            }
            Some(pending)
                if pending.content.len() + 1 + message.content.len() <= max_message_size =>
            {
                pending.content.push(b'\n');
                pending.content.extend_from_slice(&message.content);
                pending.raw_data_len += message.raw_data_len;
            }
            _ => {
                self.flush_pending(outputs);
                outputs.push_back(message);
            }
        }
    }

    fn flush_pending(&mut self, outputs: &mut VecDeque<DecodedMessage>) {
        if let Some(pending) = self.pending.take() {
            outputs.push_back(pending);
        }
    }
}

fn is_start(pattern: &Regex, content: &[u8]) -> bool {
    !content.is_empty() && pattern.is_match(&String::from_utf8_lossy(content))
}

impl Decoder for LineDecoder {
    fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);
        self.frame();
        Ok(())
    }

    fn next_output(&mut self) -> Option<DecodedMessage> {
        self.outputs.pop_front()
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            let truncated = std::mem::take(&mut self.continuing_truncated);
            self.emit_line(&tail, tail.len(), truncated);
        }
        self.flush_idle();
    }

    fn discard(&mut self) -> usize {
        let mut dropped = std::mem::take(&mut self.buffer).len();
        self.continuing_truncated = false;
        if let Some(pending) = self.multiline.as_mut().and_then(|m| m.pending.take()) {
            dropped += pending.raw_data_len;
        }
        dropped
    }

    fn detected_pattern(&self) -> Option<&Regex> {
        self.multiline.as_ref().and_then(|m| m.detector.detected())
    }

    fn idle_flush_timeout(&self) -> Option<Duration> {
        self.multiline
            .as_ref()
            .filter(|m| m.pending.is_some())
            .map(|m| m.detector.config().flush_timeout)
    }

    fn flush_idle(&mut self) {
        if let Some(multiline) = self.multiline.as_mut() {
            multiline.flush_pending(&mut self.outputs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut LineDecoder) -> Vec<DecodedMessage> {
        std::iter::from_fn(|| decoder.next_output()).collect()
    }

    fn contents(messages: &[DecodedMessage]) -> Vec<String> {
        messages
            .iter()
            .map(|m| String::from_utf8_lossy(&m.content).into_owned())
            .collect()
    }

    #[test]
    fn test_lines_and_raw_lengths() {
        let mut decoder = LineDecoder::new(1024);
        decoder.push(b"hello world\nhello again\r\n").unwrap();

        let out = drain(&mut decoder);
        assert_eq!(contents(&out), vec!["hello world", "hello again"]);
        assert_eq!(out[0].raw_data_len, 12);
        assert_eq!(out[1].raw_data_len, 13);
    }

    #[test]
    fn test_partial_line_waits_for_terminator() {
        let mut decoder = LineDecoder::new(1024);
        decoder.push(b"good ").unwrap();
        assert!(decoder.next_output().is_none());

        decoder.push(b"bye\n").unwrap();
        let out = drain(&mut decoder);
        assert_eq!(contents(&out), vec!["good bye"]);
        assert_eq!(out[0].raw_data_len, 9);
    }

    #[test]
    fn test_blank_lines_are_empty_and_counted() {
        let input = "\t\t  \n\r\nmessage 1\n\n  \n";
        let mut decoder = LineDecoder::new(1024);
        decoder.push(input.as_bytes()).unwrap();

        let out = drain(&mut decoder);
        let non_empty: Vec<_> = out.iter().filter(|m| !m.content.is_empty()).collect();
        assert_eq!(non_empty.len(), 1);
        assert_eq!(non_empty[0].content, b"message 1");

        let total: usize = out.iter().map(|m| m.raw_data_len).sum();
        assert_eq!(total, input.len());
    }

    #[test]
    fn test_long_line_is_split_and_flagged() {
        let mut decoder = LineDecoder::new(3);
        decoder.push(b"1234\nok\n").unwrap();

        let out = drain(&mut decoder);
        assert_eq!(contents(&out), vec!["123", "4", "ok"]);
        assert!(out[0].truncated);
        assert!(out[1].truncated);
        assert!(!out[2].truncated);
        assert_eq!(out.iter().map(|m| m.raw_data_len).sum::<usize>(), 8);
    }

    #[test]
    fn test_long_unterminated_line_is_split() {
        let mut decoder = LineDecoder::new(4);
        decoder.push(b"abcdefghij").unwrap();
        let out = drain(&mut decoder);
        assert_eq!(contents(&out), vec!["abcd", "efgh"]);

        decoder.flush();
        let out = drain(&mut decoder);
        assert_eq!(contents(&out), vec!["ij"]);
        assert!(out[0].truncated);
    }

    #[test]
    fn test_flush_and_discard() {
        let mut decoder = LineDecoder::new(1024);
        decoder.push(b"done\npartial").unwrap();
        decoder.flush();
        assert_eq!(contents(&drain(&mut decoder)), vec!["done", "partial"]);

        let mut decoder = LineDecoder::new(1024);
        decoder.push(b"done\npartial").unwrap();
        assert_eq!(decoder.discard(), 7);
        decoder.flush();
        assert_eq!(contents(&drain(&mut decoder)), vec!["done"]);
    }

    #[test]
    fn test_multiline_aggregation_after_detection() {
        let mut decoder = LineDecoder::new(1024)
            .with_auto_multiline(AutoMultilineConfig {
                sample_size: 2,
                match_threshold: 0.5,
                ..Default::default()
            })
            .unwrap();

        decoder
            .push(b"2021-07-12 12:55:15 first\n2021-07-12 12:55:16 second\n")
            .unwrap();
        assert!(decoder.detected_pattern().is_some());
        assert_eq!(contents(&drain(&mut decoder)), vec!["2021-07-12 12:55:15 first"]);
        assert!(decoder.idle_flush_timeout().is_some());

        decoder
            .push(b"  at frame one\n  at frame two\n2021-07-12 12:55:17 third\n")
            .unwrap();
        let out = drain(&mut decoder);
        assert_eq!(
            contents(&out),
            vec!["2021-07-12 12:55:16 second\nat frame one\nat frame two"]
        );
        assert_eq!(out[0].raw_data_len, 27 + 15 + 15);

        decoder.flush_idle();
        assert_eq!(contents(&drain(&mut decoder)), vec!["2021-07-12 12:55:17 third"]);
        assert!(decoder.idle_flush_timeout().is_none());
    }
}
