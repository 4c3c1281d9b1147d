use std::env::args;

use crate::CompilerError;

/// 命令行参数：minic <input.mc> [<output.s>]
/// 省略输出文件时写到标准输出
#[derive(Debug, Clone)]
pub struct Params {
    pub input: String,
    pub output: Option<String>,
}

impl Params {
    pub fn from_args() -> Result<Self, CompilerError> {
        let mut args = args();
        args.next();

        let input = args.next().ok_or_else(|| {
            CompilerError::ArgsError("usage: minic <input.mc> [<output.s>]".to_string())
        })?;
        let output = args.next();
        if args.next().is_some() {
            return Err(CompilerError::ArgsError(
                "too many arguments; usage: minic <input.mc> [<output.s>]".to_string(),
            ));
        }
        Ok(Params { input, output })
    }
}
