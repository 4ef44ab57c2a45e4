use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Lines};
use std::path::Path;

use winnow::ascii::{dec_uint, hex_digit1, space0, space1};
use winnow::combinator::{alt, delimited, dispatch, empty, fail, opt, preceded, terminated};
use winnow::error::{StrContext, StrContextValue};
use winnow::token::any;
use winnow::{ModalResult, Parser};

#[derive(Debug)]
pub enum TraceError {
    Unavailable(std::io::Error),
    Malformed(MalformedRecord),
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceError::Unavailable(e) => f.write_fmt(format_args!("trace unavailable: {e}")),
            TraceError::Malformed(e) => f.write_fmt(format_args!("{e}")),
        }
    }
}

impl std::error::Error for TraceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TraceError::Unavailable(e) => Some(e),
            TraceError::Malformed(e) => Some(e),
        }
    }
}

impl From<MalformedRecord> for TraceError {
    fn from(e: MalformedRecord) -> Self {
        TraceError::Malformed(e)
    }
}

/// A trace entry that cannot be replayed. Skipping it leaves the run intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    Syntax {
        line: usize,
        text: String,
        reason: String,
    },
    ZeroSize(AccessRecord),
}

impl std::fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedRecord::Syntax { line, text, reason } => {
                f.write_fmt(format_args!("line {line}: {reason}: '{text}'"))
            }
            MalformedRecord::ZeroSize(record) => {
                f.write_fmt(format_args!("zero-sized access '{record}'"))
            }
        }
    }
}

impl std::error::Error for MalformedRecord {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessKind {
    Load,
    Store,
    /// A load immediately followed by a store to the same address.
    Modify,
}

impl AccessKind {
    /// Number of cache accesses this operation performs.
    pub fn accesses(&self) -> usize {
        match self {
            AccessKind::Load | AccessKind::Store => 1,
            AccessKind::Modify => 2,
        }
    }

    pub fn marker(&self) -> char {
        match self {
            AccessKind::Load => 'L',
            AccessKind::Store => 'S',
            AccessKind::Modify => 'M',
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub kind: AccessKind,
    pub address: u64,
    /// Bytes touched. Only checked for being non-zero, no data is moved.
    pub size: u32,
}

impl std::fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{} {:x},{}",
            self.kind.marker(),
            self.address,
            self.size
        ))
    }
}

/// Lazily parsed valgrind (lackey) memory trace.
///
/// ```text
/// I 0400d7d4,8
///  L 7ff0005b8,8
///  M 0421c7f0,4
/// ```
///
/// Instruction fetches and blank lines are skipped.
#[derive(Debug)]
pub struct Trace<R> {
    lines: Lines<R>,
    line: usize,
    failed: bool,
}

impl Trace<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let file = File::open(path).map_err(TraceError::Unavailable)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> Trace<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for Trace<R> {
    type Item = Result<AccessRecord, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    self.line += 1;
                    return Some(Err(MalformedRecord::Syntax {
                        line: self.line,
                        text: String::new(),
                        reason: e.to_string(),
                    }
                    .into()));
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(TraceError::Unavailable(e)));
                }
            };
            self.line += 1;

            let text = text.trim_end();
            if text.is_empty() {
                continue;
            }

            match parse_line(text) {
                Ok(TraceLine::InstructionFetch) => continue,
                Ok(TraceLine::Access(record)) => return Some(Ok(record)),
                Err(reason) => {
                    return Some(Err(MalformedRecord::Syntax {
                        line: self.line,
                        text: text.to_string(),
                        reason,
                    }
                    .into()));
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TraceLine {
    InstructionFetch,
    Access(AccessRecord),
}

fn parse_line(text: &str) -> Result<TraceLine, String> {
    trace_line.parse(text).map_err(|e| {
        let reason = e.inner().to_string().replace('\n', ", ");
        if reason.is_empty() {
            format!("unrecognized record at column {}", e.offset() + 1)
        } else {
            format!("{reason} at column {}", e.offset() + 1)
        }
    })
}

fn trace_line(input: &mut &str) -> ModalResult<TraceLine> {
    let (kind, address, size) = delimited(
        space0,
        (
            terminated(operation, space1),
            terminated(address, ','.context(StrContext::Label("separator"))),
            size,
        ),
        space0,
    )
    .parse_next(input)?;

    Ok(match kind {
        None => TraceLine::InstructionFetch,
        Some(kind) => TraceLine::Access(AccessRecord {
            kind,
            address,
            size,
        }),
    })
}

/// `None` marks an instruction fetch.
fn operation(input: &mut &str) -> ModalResult<Option<AccessKind>> {
    dispatch! {any;
        'I' => empty.value(None),
        'L' => empty.value(Some(AccessKind::Load)),
        'S' => empty.value(Some(AccessKind::Store)),
        'M' => empty.value(Some(AccessKind::Modify)),
        _ => fail::<_, Option<AccessKind>, _>,
    }
    .context(StrContext::Label("operation"))
    .context(StrContext::Expected(StrContextValue::Description(
        "one of I, L, S, M",
    )))
    .parse_next(input)
}

fn address(input: &mut &str) -> ModalResult<u64> {
    preceded(opt(alt(("0x", "0X"))), hex_digit1)
        .try_map(|digits| u64::from_str_radix(digits, 16))
        .context(StrContext::Label("address"))
        .context(StrContext::Expected(StrContextValue::Description(
            "a 64 bit hexadecimal address",
        )))
        .parse_next(input)
}

fn size(input: &mut &str) -> ModalResult<u32> {
    dec_uint
        .context(StrContext::Label("size"))
        .context(StrContext::Expected(StrContextValue::Description(
            "a decimal byte count",
        )))
        .parse_next(input)
}

#[cfg(test)]
mod test {
    use super::*;

    fn records(trace: &str) -> Vec<Result<AccessRecord, String>> {
        Trace::new(trace.as_bytes())
            .map(|item| item.map_err(|e| e.to_string()))
            .collect()
    }

    #[test]
    fn parses_lackey_lines() {
        assert_eq!(
            parse_line(" L 7ff0005b8,8"),
            Ok(TraceLine::Access(AccessRecord {
                kind: AccessKind::Load,
                address: 0x7ff0005b8,
                size: 8,
            }))
        );
        assert_eq!(
            parse_line("S 0x10,1"),
            Ok(TraceLine::Access(AccessRecord {
                kind: AccessKind::Store,
                address: 0x10,
                size: 1,
            }))
        );
        assert_eq!(
            parse_line(" M 0421C7F0,4  "),
            Ok(TraceLine::Access(AccessRecord {
                kind: AccessKind::Modify,
                address: 0x0421c7f0,
                size: 4,
            }))
        );
        assert_eq!(parse_line("I 0400d7d4,8"), Ok(TraceLine::InstructionFetch));
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in [
            " L 10 1",
            " L zz,1",
            " X 10,1",
            " L,10,1",
            " L 10,",
            " L 10,-1",
            " L 10,1 extra",
            " L 1ffffffffffffffff,1",
        ] {
            assert!(parse_line(line).is_err(), "accepted '{line}'");
        }
    }

    #[test]
    fn skips_instruction_fetches_and_blank_lines() {
        let trace = "I 0400d7d4,8\n\n L 10,1\n   \n M 20,1\r\n";

        assert_eq!(
            records(trace),
            vec![
                Ok(AccessRecord {
                    kind: AccessKind::Load,
                    address: 0x10,
                    size: 1,
                }),
                Ok(AccessRecord {
                    kind: AccessKind::Modify,
                    address: 0x20,
                    size: 1,
                }),
            ]
        );
    }

    #[test]
    fn malformed_line_does_not_end_the_trace() {
        let mut trace = Trace::new(" L 10,1\n L oops\n S 20,1\n".as_bytes());

        assert!(trace.next().unwrap().is_ok());
        match trace.next().unwrap() {
            Err(TraceError::Malformed(MalformedRecord::Syntax { line, text, .. })) => {
                assert_eq!(line, 2);
                assert_eq!(text, " L oops");
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
        assert_eq!(trace.next().unwrap().unwrap().address, 0x20);
        assert!(trace.next().is_none());
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let bytes: &[u8] = b" L 10,1\n\xff\xfe\n S 20,1\n";

        let results: Vec<_> = Trace::new(bytes).collect();

        assert_eq!(results.len(), 3);
        assert!(matches!(
            results[1],
            Err(TraceError::Malformed(MalformedRecord::Syntax { line: 2, .. }))
        ));
        assert!(results[2].is_ok());
    }

    #[test]
    fn missing_file_is_unavailable() {
        assert!(matches!(
            Trace::open("/nonexistent/trace/file"),
            Err(TraceError::Unavailable(_))
        ));
    }

    #[test]
    fn displays_record_in_trace_notation() {
        let record = AccessRecord {
            kind: AccessKind::Modify,
            address: 0xabc,
            size: 4,
        };

        assert_eq!(record.to_string(), "M abc,4");
    }
}
