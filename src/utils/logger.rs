use colored::Colorize;

use crate::CompilerError;

/// 打印错误信息并退出程序
pub fn print_error_and_exit(error: &CompilerError, exit_code: i32) -> ! {
    print_error(error);
    std::process::exit(exit_code)
}

/// 打印错误信息（不退出）。语义检查可能批量产出多行诊断，逐行报告
pub fn print_error(error: &CompilerError) {
    for line in error.to_string().lines() {
        eprintln!("{} {}", "Error:".red().bold(), line.bold());
    }
}
