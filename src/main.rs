use std::fs::read_to_string;

use lalrpop_util::lexer::Token;
use lalrpop_util::{lalrpop_mod, ParseError};

mod back;
mod front;
mod ir;
mod utils;

use crate::back::generate_asm;
use crate::front::check_and_lower;
use crate::utils::args::Params;
use crate::utils::logger::print_error_and_exit;
use crate::utils::SourceMap;

pub use crate::utils::CompilerError;

// 引用 lalrpop 生成的解析器（语法见 src/minic.lalrpop）
lalrpop_mod!(pub minic);

fn main() {
    if let Err(e) = run() {
        print_error_and_exit(&e, 1);
    }
}

fn format_expected(expected: Vec<String>) -> String {
    if expected.is_empty() {
        "no expected tokens".to_string()
    } else {
        expected.join(", ")
    }
}

fn format_parse_error(source_map: &SourceMap, err: ParseError<usize, Token<'_>, &str>) -> String {
    match err {
        ParseError::InvalidToken { location } => {
            format!("Invalid token at {}", source_map.format_location(location))
        }
        ParseError::UnrecognizedEof { location, expected } => {
            format!(
                "Unexpected end of file at {}. Expected: {}",
                source_map.format_location(location),
                format_expected(expected)
            )
        }
        ParseError::UnrecognizedToken { token, expected } => {
            let (start, tok, _end) = token;
            format!(
                "Unrecognized token {:?} at {}. Expected: {}",
                tok,
                source_map.format_location(start),
                format_expected(expected)
            )
        }
        ParseError::ExtraToken { token } => {
            let (start, tok, _end) = token;
            format!(
                "Extra token {:?} at {}",
                tok,
                source_map.format_location(start)
            )
        }
        ParseError::User { error } => {
            format!("Parse error: {}", error)
        }
    }
}

fn run() -> Result<(), CompilerError> {
    let params = Params::from_args()?;

    let input = read_to_string(&params.input)?;
    let source_map = SourceMap::new(&input);

    let ast = minic::CompUnitParser::new()
        .parse(&input)
        .map_err(|e| CompilerError::ParseError(format_parse_error(&source_map, e)))?;

    let ir = check_and_lower(&ast, &source_map)?;
    let asm = generate_asm(&ir)?;

    match &params.output {
        Some(path) => std::fs::write(path, asm)?,
        None => print!("{}", asm),
    }
    Ok(())
}
