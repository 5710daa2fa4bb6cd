use nom::combinator::complete;
use nom::error::ParseError;
use nom::multi::many0;
use nom::{IResult, InputLength, Parser};

/// Applies the parser zero or more times, treating incomplete input as
/// end-of-input rather than as a request for more bytes.
pub fn many0_complete<I, O, E, F>(parser: F) -> impl FnMut(I) -> IResult<I, Vec<O>, E>
where
    I: Clone + InputLength,
    E: ParseError<I>,
    F: Parser<I, O, E>,
{
    many0(complete(parser))
}
