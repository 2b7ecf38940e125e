#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for command and report lines.
//!
//! The lexer uses `regal` to produce a bounded token stream; the parser walks
//! that stream with `winnow` stream primitives, looking every parameter up in
//! the [`catalog`](super::catalog) so the dictionary is the single source of
//! message layouts.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
use winnow::error::ErrMode;
use winnow::stream::Stream;

use super::catalog::{self, MAX_PARAMS, MessageSpec, MessageTag, ParamSpec};
use crate::clock::Tick;
use crate::device::SampleReport;
use crate::driver::{ConfigRequest, QueryRequest};

/// Maximum number of tokens produced per line: a name, eight `key=value`
/// triples, and line terminators.
pub const MAX_TOKENS: usize = 32;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Decimal integer literal, optionally negative.
    #[regex(r"-?[0-9]+")]
    Integer,
    /// Message or parameter name (case-insensitive match performed later).
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    /// Separates a parameter name from its value.
    #[token("=")]
    Equals,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Bounded token buffer to avoid dynamic allocation in `no_std` environments.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

/// Lexer errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    /// Underlying lexer reported an unrecoverable error.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

/// Grammar errors emitted by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    UnknownMessage {
        lexeme: &'a str,
        span: Range<usize>,
    },
    UnknownParameter {
        lexeme: &'a str,
        span: Range<usize>,
    },
    DuplicateParameter {
        name: &'static str,
        span: Range<usize>,
    },
    MissingParameter {
        name: &'static str,
    },
    /// Literal does not fit the parameter's wire type.
    InvalidInteger {
        name: &'static str,
        span: Range<usize>,
    },
    InvalidToken {
        lexeme: &'a str,
        span: Range<usize>,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarErrorKind::UnknownMessage { lexeme, span } => {
                write!(f, "unknown message `{lexeme}` at {span:?}")
            }
            GrammarErrorKind::UnknownParameter { lexeme, span } => {
                write!(f, "unknown parameter `{lexeme}` at {span:?}")
            }
            GrammarErrorKind::DuplicateParameter { name, span } => {
                write!(f, "parameter `{name}` repeated at {span:?}")
            }
            GrammarErrorKind::MissingParameter { name } => {
                write!(f, "missing parameter `{name}`")
            }
            GrammarErrorKind::InvalidInteger { name, span } => {
                write!(f, "value for `{name}` out of range at {span:?}")
            }
            GrammarErrorKind::InvalidToken { lexeme, span } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
        }
    }
}

/// Wrapper type enabling a consistent error surface for consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: Some(tok.kind),
                    span: tok.span.clone(),
                },
                None => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn unknown_message(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::UnknownMessage {
                lexeme: token.lexeme,
                span: token.span.clone(),
            },
        }
    }

    fn unknown_parameter(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::UnknownParameter {
                lexeme: token.lexeme,
                span: token.span.clone(),
            },
        }
    }

    fn duplicate(param: &ParamSpec, token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::DuplicateParameter {
                name: param.name,
                span: token.span.clone(),
            },
        }
    }

    fn missing(param: &ParamSpec) -> Self {
        GrammarError {
            kind: GrammarErrorKind::MissingParameter { name: param.name },
        }
    }

    fn invalid_integer(param: &ParamSpec, token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidInteger {
                name: param.name,
                span: token.span.clone(),
            },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                lexeme: token.lexeme,
                span: token.span.clone(),
            },
        }
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Structured messages produced by the parser.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Config(ConfigRequest),
    Query(QueryRequest),
    Report(SampleReport),
}

impl Message {
    #[must_use]
    pub const fn tag(&self) -> MessageTag {
        match self {
            Message::Config(_) => MessageTag::ConfigHx711,
            Message::Query(_) => MessageTag::QueryHx711,
            Message::Report(_) => MessageTag::InState,
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];
type Step<'src, T> = Result<T, ErrMode<GrammarError<'src>>>;

/// Tokenize the provided line.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let lexeme = &line[span.clone()];
        push_token(&mut buffer, record.token, lexeme, span)?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let span = partial.start..partial.start + partial.fragment.len();
        push_token(&mut buffer, TokenKind::Error, partial.fragment, span)?;
    }

    Ok(buffer)
}

fn push_token<'a>(
    buffer: &mut TokenBuffer<'a>,
    kind: TokenKind,
    lexeme: &'a str,
    span: Range<usize>,
) -> Result<(), LexError> {
    buffer
        .push(Token { kind, lexeme, span })
        .map_err(|_| LexError::TooManyTokens {
            processed: MAX_TOKENS + 1,
        })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a command or report line.
pub fn parse(line: &str) -> Result<Message, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let mut input = tokens.as_slice();
    let parsed = message(&mut input).map_err(|err| ParseError::Grammar(into_grammar(err, input)))?;

    while let Some((token, remaining)) = input.split_first() {
        if token.kind == TokenKind::Eol {
            input = remaining;
        } else {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "parameter",
                Some(token),
            )));
        }
    }

    Ok(parsed)
}

/// Parse an `hx711_in_state` report line.
pub fn parse_report(line: &str) -> Result<SampleReport, ParseError<'_>> {
    match parse(line)? {
        Message::Report(report) => Ok(report),
        Message::Config(_) | Message::Query(_) => Err(ParseError::Grammar(GrammarError {
            kind: GrammarErrorKind::UnexpectedToken {
                expected: "hx711_in_state",
                found: Some(TokenKind::Ident),
                span: 0..line.find(' ').unwrap_or(line.len()),
            },
        })),
    }
}

fn into_grammar<'src>(err: ErrMode<GrammarError<'src>>, input: Input<'src, '_>) -> GrammarError<'src> {
    match err {
        ErrMode::Backtrack(err) | ErrMode::Cut(err) => err,
        ErrMode::Incomplete(_) => GrammarError::unexpected("token", input.first()),
    }
}

fn message<'src, 'slice>(input: &mut Input<'src, 'slice>) -> Step<'src, Message>
where
    'src: 'slice,
{
    let name = expect_kind(input, TokenKind::Ident, "message name")?;
    let spec =
        catalog::find(name.lexeme).ok_or_else(|| ErrMode::Cut(GrammarError::unknown_message(&name)))?;
    let values = parameters(input, spec)?;
    Ok(values.build(spec.tag))
}

fn parameters<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    spec: &'static MessageSpec,
) -> Step<'src, ParamValues>
where
    'src: 'slice,
{
    let mut values = ParamValues::default();

    while input.first().is_some_and(|token| token.kind == TokenKind::Ident) {
        let key = expect_kind(input, TokenKind::Ident, "parameter name")?;
        let index = spec
            .param_index(key.lexeme)
            .ok_or_else(|| ErrMode::Cut(GrammarError::unknown_parameter(&key)))?;
        let param = &spec.params[index];

        expect_kind(input, TokenKind::Equals, "=").map_err(cut)?;
        let literal = expect_kind(input, TokenKind::Integer, "integer").map_err(cut)?;
        let value = parse_integer(param, &literal).map_err(ErrMode::Cut)?;

        if values.slots[index].replace(value).is_some() {
            return Err(ErrMode::Cut(GrammarError::duplicate(param, &key)));
        }
    }

    if let Some(param) = spec
        .params
        .iter()
        .zip(values.slots.iter())
        .find_map(|(param, slot)| slot.is_none().then_some(param))
    {
        return Err(ErrMode::Cut(GrammarError::missing(param)));
    }

    Ok(values)
}

fn expect_kind<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    kind: TokenKind,
    label: &'static str,
) -> Step<'src, Token<'src>>
where
    'src: 'slice,
{
    let checkpoint = input.checkpoint();
    match input.next_token() {
        Some(token) if token.kind == kind => Ok(token),
        found => {
            input.reset(&checkpoint);
            Err(ErrMode::Backtrack(GrammarError::unexpected(
                label,
                found.as_ref(),
            )))
        }
    }
}

fn cut<E>(err: ErrMode<E>) -> ErrMode<E> {
    match err {
        ErrMode::Backtrack(err) => ErrMode::Cut(err),
        other => other,
    }
}

fn parse_integer<'a>(param: &ParamSpec, token: &Token<'a>) -> Result<i64, GrammarError<'a>> {
    let (min, max) = param.kind.range();
    token
        .lexeme
        .parse::<i64>()
        .ok()
        .filter(|value| (min..=max).contains(value))
        .ok_or_else(|| GrammarError::invalid_integer(param, token))
}

/// Parameter values in dictionary order, range-checked against their kinds.
#[derive(Default)]
struct ParamValues {
    slots: [Option<i64>; MAX_PARAMS],
}

impl ParamValues {
    fn byte(&self, index: usize) -> u8 {
        self.raw(index)
            .and_then(|value| u8::try_from(value).ok())
            .unwrap_or_default()
    }

    fn unsigned(&self, index: usize) -> u32 {
        self.raw(index)
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or_default()
    }

    fn signed(&self, index: usize) -> i32 {
        self.raw(index)
            .and_then(|value| i32::try_from(value).ok())
            .unwrap_or_default()
    }

    fn raw(&self, index: usize) -> Option<i64> {
        self.slots.get(index).copied().flatten()
    }

    fn build(&self, tag: MessageTag) -> Message {
        match tag {
            MessageTag::ConfigHx711 => Message::Config(ConfigRequest {
                oid: self.byte(0),
                dout_pin: self.unsigned(1),
                sck_pin: self.unsigned(2),
                gain: self.unsigned(3),
                sample_interval: self.unsigned(4),
                comm_delay_us: self.unsigned(5),
                sps: self.unsigned(6),
            }),
            MessageTag::QueryHx711 => Message::Query(QueryRequest {
                oid: self.byte(0),
                clock: self.unsigned(1),
                sample_ticks: self.unsigned(2),
                sample_count: self.byte(3),
                rest_ticks: self.unsigned(4),
                min_value: self.unsigned(5),
                max_value: self.unsigned(6),
                range_check_count: self.byte(7),
            }),
            MessageTag::InState => Message::Report(SampleReport {
                oid: self.byte(0),
                next_clock: Tick::new(self.unsigned(1)),
                value: self.signed(2),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Message {
        parse(input).expect("line should parse")
    }

    fn grammar_error(input: &str) -> GrammarErrorKind<'_> {
        match parse(input) {
            Err(ParseError::Grammar(err)) => err.kind,
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parses_config_line() {
        assert_eq!(
            parse_ok(
                "config_hx711 oid=3 dout_pin=10 sck_pin=11 gain=1 sample_interval=10 comm_delay=1 sps=80\n"
            ),
            Message::Config(ConfigRequest {
                oid: 3,
                dout_pin: 10,
                sck_pin: 11,
                gain: 1,
                sample_interval: 10,
                comm_delay_us: 1,
                sps: 80,
            })
        );
    }

    #[test]
    fn parameters_may_appear_in_any_order_and_case() {
        let message = parse_ok(
            "QUERY_HX711 range_check_count=0 Oid=2 clock=5 sample_ticks=0 sample_count=1 rest_ticks=0 min_value=0 max_value=0",
        );
        let Message::Query(query) = message else {
            panic!("unexpected message: {message:?}");
        };
        assert_eq!(query.oid, 2);
        assert_eq!(query.clock, 5);
        assert_eq!(query.sample_count, 1);
    }

    #[test]
    fn parses_negative_report_value() {
        assert_eq!(
            parse_report("hx711_in_state oid=1 next_clock=4294967295 value=-8388608"),
            Ok(SampleReport {
                oid: 1,
                next_clock: Tick::new(u32::MAX),
                value: -8_388_608,
            })
        );
    }

    #[test]
    fn rejects_unknown_and_duplicate_parameters() {
        assert!(matches!(
            grammar_error("hx711_in_state oid=1 next_clock=2 value=3 extra=4"),
            GrammarErrorKind::UnknownParameter { lexeme: "extra", .. }
        ));
        assert!(matches!(
            grammar_error("hx711_in_state oid=1 oid=1 next_clock=2 value=3"),
            GrammarErrorKind::DuplicateParameter { name: "oid", .. }
        ));
    }

    #[test]
    fn reports_missing_parameter() {
        assert_eq!(
            grammar_error("hx711_in_state oid=1 value=3"),
            GrammarErrorKind::MissingParameter { name: "next_clock" }
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert_eq!(
            grammar_error("hx711_in_state oid=256 next_clock=0 value=0"),
            GrammarErrorKind::InvalidInteger {
                name: "oid",
                span: 19..22
            }
        );
        assert!(matches!(
            grammar_error("hx711_in_state oid=1 next_clock=-1 value=0"),
            GrammarErrorKind::InvalidInteger {
                name: "next_clock",
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_message() {
        assert!(matches!(
            grammar_error("config_hx712 oid=1"),
            GrammarErrorKind::UnknownMessage {
                lexeme: "config_hx712",
                ..
            }
        ));
    }

    #[test]
    fn rejects_missing_value() {
        assert!(matches!(
            grammar_error("hx711_in_state oid= next_clock=0 value=0"),
            GrammarErrorKind::UnexpectedToken {
                expected: "integer",
                found: Some(TokenKind::Ident),
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_token() {
        assert!(matches!(
            grammar_error("hx711_in_state oid=1$"),
            GrammarErrorKind::InvalidToken { lexeme: "$", .. }
        ));
    }

    #[test]
    fn report_request_rejects_commands() {
        assert!(parse_report("query_hx711 oid=0 clock=0 sample_ticks=0 sample_count=0 rest_ticks=0 min_value=0 max_value=0 range_check_count=0").is_err());
    }
}
