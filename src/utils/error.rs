use std::fmt;

/// 编译全程共用的错误类型，按流水线阶段划分
#[derive(Debug)]
pub enum CompilerError {
    // I/O 错误
    IoError(std::io::Error),
    // 解析错误
    ParseError(String),
    // 语义检查错误（可能携带多条诊断，换行分隔）
    SemanticError(String),
    // IR 生成错误
    LoweringError(String),
    // 代码生成错误
    CodeGenError(String),
    // 参数解析错误
    ArgsError(String),
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompilerError::IoError(e) => write!(f, "I/O error: {}", e),
            CompilerError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            CompilerError::SemanticError(msg) => write!(f, "{}", msg),
            CompilerError::LoweringError(msg) => write!(f, "IR generation error: {}", msg),
            CompilerError::CodeGenError(msg) => write!(f, "Code generation error: {}", msg),
            CompilerError::ArgsError(msg) => write!(f, "Argument error: {}", msg),
        }
    }
}

impl std::error::Error for CompilerError {}

impl From<std::io::Error> for CompilerError {
    fn from(err: std::io::Error) -> Self {
        CompilerError::IoError(err)
    }
}
