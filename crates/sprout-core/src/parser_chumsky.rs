use chumsky::extra;
use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;

use crate::ast::{BinaryOperator, Literal, RandomBranch, Step, SwitchCase, UnaryOperator};
use crate::lexer::{Span, Token};

type ParserExtra<'tokens> = extra::Err<Rich<'tokens, Token>>;

/// A rule definition as written in source, with the span of its name
pub(crate) type RuleDefinition = (String, Span, Step);

pub(crate) fn grammar_parser<'src, I>()
-> impl Parser<'src, I, Vec<RuleDefinition>, ParserExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    ident()
        .map_with(|name, ext| (name, ext.span()))
        .then_ignore(just(Token::Arrow))
        .then(steps_parser())
        .map(|((name, span), step)| (name, span, step))
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
}

pub(crate) fn standalone_steps_parser<'src, I>()
-> impl Parser<'src, I, Step, ParserExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    steps_parser().then_ignore(end())
}

pub(crate) fn parse_grammar_tokens<'tokens>(
    tokens: &'tokens [(Token, Span)],
    eof: Span,
) -> (Option<Vec<RuleDefinition>>, Vec<Rich<'tokens, Token>>) {
    let stream = Stream::from_iter(tokens.iter().cloned()).map(eof, |(t, s)| (t, s));
    grammar_parser().parse(stream).into_output_errors()
}

pub(crate) fn parse_steps_tokens<'tokens>(
    tokens: &'tokens [(Token, Span)],
    eof: Span,
) -> (Option<Step>, Vec<Rich<'tokens, Token>>) {
    let stream = Stream::from_iter(tokens.iter().cloned()).map(eof, |(t, s)| (t, s));
    standalone_steps_parser().parse(stream).into_output_errors()
}

fn ident<'src, I>() -> impl Parser<'src, I, String, ParserExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    select! { Token::Ident(name) => name }.labelled("identifier")
}

fn number<'src, I>() -> impl Parser<'src, I, f64, ParserExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    select! { Token::Number(text) => text }.try_map(|text: String, span| {
        text.parse::<f64>()
            .map_err(|_| Rich::custom(span, format!("invalid number literal '{}'", text)))
    })
}

/// A `N%` weight, read as a probability by moving the decimal point of
/// the literal so no rounding happens before the final conversion.
fn probability<'src, I>() -> impl Parser<'src, I, f64, ParserExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    select! { Token::Number(text) => text }.try_map(|text: String, span| {
        percent_to_probability(&text)
            .ok_or_else(|| Rich::custom(span, format!("invalid percentage '{}'", text)))
    })
}

fn percent_to_probability(text: &str) -> Option<f64> {
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    let digits = format!("{}{}", whole, fraction);
    let shifted = match whole.len().checked_sub(2) {
        Some(point) if point > 0 => format!("{}.{}", &digits[..point], &digits[point..]),
        Some(_) => format!("0.{}", digits),
        None => format!("0.{}{}", "0".repeat(2 - whole.len()), digits),
    };
    shifted.parse::<f64>().ok()
}

fn literal<'src, I>() -> impl Parser<'src, I, Literal, ParserExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    choice((
        number().map(Literal::Number),
        select! {
            Token::Str(value) => Literal::String(value),
            Token::True => Literal::Boolean(true),
            Token::False => Literal::Boolean(false),
        },
    ))
    .labelled("literal")
}

/// Case labels additionally accept a negated number.
fn case_literal<'src, I>() -> impl Parser<'src, I, Literal, ParserExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    choice((
        just(Token::Minus)
            .ignore_then(number())
            .map(|value| Literal::Number(-value)),
        literal(),
    ))
}

/// Full step expression: parallel over sequential over `or` operands.
fn steps_parser<'src, I>() -> impl Parser<'src, I, Step, ParserExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    recursive(|steps| {
        let or_level = recursive(|or_level| {
            let bracket = steps
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .map(Step::bracket);

            // this.name = value | this.name | this
            let variable = just(Token::This)
                .ignore_then(just(Token::Dot))
                .ignore_then(ident())
                .then(just(Token::Assign).ignore_then(or_level.clone()).or_not())
                .map(|(name, value)| match value {
                    Some(value) => Step::set_variable(name, value),
                    None => Step::get_variable(name),
                });

            let if_else = just(Token::If)
                .ignore_then(or_level.clone())
                .then_ignore(just(Token::Then))
                .then(or_level.clone())
                .then_ignore(just(Token::Else))
                .then(or_level.clone())
                .map(|((condition, then_branch), else_branch)| {
                    Step::if_else(condition, then_branch, else_branch)
                });

            let switch_case = just(Token::Case)
                .ignore_then(case_literal())
                .then_ignore(just(Token::Colon))
                .then(or_level.clone())
                .map(|(value, branch)| SwitchCase { value, branch });

            let switch = just(Token::Switch)
                .ignore_then(or_level.clone())
                .then(switch_case.repeated().at_least(1).collect::<Vec<_>>())
                .map(|(discriminant, cases)| Step::Switch {
                    discriminant: Box::new(discriminant),
                    cases,
                });

            let random_branch = probability()
                .then_ignore(just(Token::Percent))
                .then_ignore(just(Token::Colon))
                .then(steps.clone())
                .map(|(probability, branch)| RandomBranch {
                    probability,
                    branch,
                });

            let random = random_branch
                .clone()
                .then(
                    just(Token::Case)
                        .ignore_then(random_branch)
                        .repeated()
                        .collect::<Vec<_>>(),
                )
                .delimited_by(just(Token::LBrace), just(Token::RBrace))
                .map(|(first, rest)| Step::Random {
                    branches: std::iter::once(first).chain(rest).collect(),
                });

            let operation = select! { Token::Call(name) => name }
                .then(
                    steps
                        .clone()
                        .separated_by(just(Token::Comma))
                        .collect::<Vec<_>>(),
                )
                .then_ignore(just(Token::RParen))
                .map(|(name, arguments)| Step::Operation { name, arguments });

            // An identifier followed by `->` starts the next rule
            let symbol = ident()
                .then_ignore(just(Token::Arrow).not())
                .map(Step::symbol);

            let primary = choice((
                bracket,
                variable,
                just(Token::This).to(Step::This),
                just(Token::Return).to(Step::Return),
                literal().map(Step::raw),
                if_else,
                switch,
                random,
                operation,
                symbol,
            ))
            .labelled("step")
            .boxed();

            let invert = just(Token::Minus)
                .repeated()
                .foldr(primary, |_, child| Step::unary(UnaryOperator::Invert, child))
                .boxed();

            let multiplicative = invert
                .clone()
                .foldl(
                    choice((
                        just(Token::Star).to(BinaryOperator::Multiply),
                        just(Token::Slash).to(BinaryOperator::Divide),
                        just(Token::Percent).to(BinaryOperator::Modulo),
                    ))
                    .then(invert)
                    .repeated(),
                    |left, (operator, right)| Step::binary(operator, left, right),
                )
                .boxed();

            let additive = multiplicative
                .clone()
                .foldl(
                    choice((
                        just(Token::Plus).to(BinaryOperator::Add),
                        just(Token::Minus).to(BinaryOperator::Subtract),
                    ))
                    .then(multiplicative)
                    .repeated(),
                    |left, (operator, right)| Step::binary(operator, left, right),
                )
                .boxed();

            let relational = additive
                .clone()
                .foldl(
                    choice((
                        just(Token::SmallerEqual).to(BinaryOperator::SmallerEqual),
                        just(Token::GreaterEqual).to(BinaryOperator::GreaterEqual),
                        just(Token::Smaller).to(BinaryOperator::Smaller),
                        just(Token::Greater).to(BinaryOperator::Greater),
                    ))
                    .then(additive)
                    .repeated(),
                    |left, (operator, right)| Step::binary(operator, left, right),
                )
                .boxed();

            let equality = relational
                .clone()
                .foldl(
                    choice((
                        just(Token::EqualEqual).to(BinaryOperator::Equal),
                        just(Token::NotEqual).to(BinaryOperator::Unequal),
                    ))
                    .then(relational)
                    .repeated(),
                    |left, (operator, right)| Step::binary(operator, left, right),
                )
                .boxed();

            let not = just(Token::Bang)
                .repeated()
                .foldr(equality, |_, child| Step::unary(UnaryOperator::Not, child))
                .boxed();

            let and = not
                .clone()
                .foldl(
                    just(Token::AndAnd).ignore_then(not).repeated(),
                    |left, right| Step::binary(BinaryOperator::And, left, right),
                )
                .boxed();

            and.clone().foldl(
                just(Token::OrOr).ignore_then(and).repeated(),
                |left, right| Step::binary(BinaryOperator::Or, left, right),
            )
        });

        let sequential = or_level
            .repeated()
            .at_least(1)
            .collect::<Vec<_>>()
            .map(Step::sequential);

        sequential
            .separated_by(just(Token::Pipe))
            .at_least(1)
            .collect::<Vec<_>>()
            .map(Step::parallel)
    })
}
