//! # 后端模块
//!
//! 把线性 IR 翻译为 RISC-V 风格汇编文本。
//!
//! ## 流水线
//!
//! 1. **数据段**：首个 `FuncDef` 之前的 `GlobalVar`/`Word` 节点
//!    生成标号与 `.word` 序列
//! 2. **各函数**：对每个 `FuncDef` 子序列依次做活跃分析、线性扫描
//!    寄存器分配与指令发射（见 `liveness`、`regalloc`、`emit`）
//! 3. **拼装**：运行时数据段前导 + 全局定义 + 运行时代码段前导 +
//!    各函数体，顺序与源码一致
//!
//! ## 模块结构
//!
//! - `target`: 寄存器文件、ABI 角色与运行时代码段
//! - `insts`: 指令定义与格式化
//! - `program`: 指令序列容器
//! - `liveness`: 逐节点活跃变量分析
//! - `regalloc`: 活跃区间与线性扫描
//! - `frame`: 栈帧与寄存器状态表
//! - `emit`: 逐节点指令选择

pub mod emit;
pub mod frame;
pub mod insts;
pub mod liveness;
pub mod program;
pub mod regalloc;
pub mod target;

use crate::back::frame::FrameTable;
use crate::back::insts::Instruction;
use crate::back::program::AsmProgram;
use crate::back::target::{DATA, TEXT};
use crate::ir::{function_ranges, IrNode};
use crate::CompilerError;

/// 从 IR 序列生成完整的汇编文本
pub fn generate_asm(code: &[IrNode]) -> Result<String, CompilerError> {
    let (data_end, functions) = function_ranges(code);

    let mut table = FrameTable::new();
    let mut data = AsmProgram::new();
    for node in &code[..data_end] {
        match node {
            IrNode::GlobalVar(name) => {
                table.insert_global(name);
                data.push(Instruction::Label(name.clone()));
            }
            IrNode::Word(value) => data.push(Instruction::Word(*value)),
            other => {
                return Err(CompilerError::CodeGenError(format!(
                    "unexpected node in data segment: {}",
                    other
                )))
            }
        }
    }

    let mut text = AsmProgram::new();
    for (def_index, range) in functions {
        let name = match &code[def_index] {
            IrNode::FuncDef(name) => name.clone(),
            other => {
                return Err(CompilerError::CodeGenError(format!(
                    "expected function marker, found: {}",
                    other
                )))
            }
        };
        emit::emit_function(&name, &code[range], &mut table, &mut text)?;
    }

    let mut output = String::with_capacity(DATA.len() + TEXT.len() + 4096);
    output.push_str(DATA);
    output.push_str(&data.dump());
    output.push_str(TEXT);
    output.push_str(&text.dump());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use indoc::indoc;

    use crate::utils::SourceMap;

    fn compile(src: &str) -> String {
        let ast = crate::minic::CompUnitParser::new()
            .parse(src)
            .expect("parse failed");
        let source_map = SourceMap::new(src);
        crate::front::semantic::check(&ast, &source_map).expect("semantic check failed");
        let ir = crate::front::lower::lower_program(&ast).expect("lowering failed");
        super::generate_asm(&ir).expect("codegen failed")
    }

    /// 取出某个函数的汇编行（从其标号到下一个函数标号或文件尾）
    fn function_body<'a>(asm: &'a str, name: &str, all_names: &[&str]) -> Vec<&'a str> {
        let lines: Vec<&str> = asm.lines().collect();
        let start = lines
            .iter()
            .position(|l| *l == format!("{}:", name))
            .unwrap_or_else(|| panic!("function `{}` not found", name));
        let end = lines[start + 1..]
            .iter()
            .position(|l| {
                all_names
                    .iter()
                    .any(|n| *l == format!("{}:", n))
            })
            .map(|i| start + 1 + i)
            .unwrap_or(lines.len());
        lines[start + 1..end].to_vec()
    }

    /// 收集某函数保存/恢复的被调用者保存寄存器集合
    fn saved_restored(body: &[&str]) -> (BTreeSet<String>, BTreeSet<String>) {
        let grab = |mnemonic: &str| {
            body.iter()
                .filter(|l| l.trim_start().starts_with(mnemonic))
                .filter_map(|l| {
                    let reg = l.trim_start()[3..].trim_start().split(',').next()?;
                    (reg.starts_with('s') && reg != "sp").then(|| reg.to_string())
                })
                .collect::<BTreeSet<String>>()
        };
        (grab("sw "), grab("lw "))
    }

    #[test]
    fn identity_function_shape() {
        let asm = compile("int id(int x) { return x; } int main() { return id(5); }");
        assert!(asm.contains("id:"));
        let body = function_body(&asm, "id", &["id", "main"]);
        assert_eq!(body.last().map(|l| l.trim()), Some("ret"));
        // id 自身不调用，无需保存 ra
        assert!(!body.iter().any(|l| l.contains("sw ra")));
        let (saved, restored) = saved_restored(&body);
        assert_eq!(saved, restored);
    }

    #[test]
    fn runtime_and_data_layout_order() {
        let asm = compile("int g = 7; int main() { return g; }");
        let data_pos = asm.find(".data").unwrap();
        let g_pos = asm.find("g:\n.word 7").unwrap();
        let text_pos = asm.find(".text").unwrap();
        let main_pos = asm.find("main:").unwrap();
        assert!(data_pos < g_pos && g_pos < text_pos && text_pos < main_pos);
        // 运行时例程逐字出现
        assert!(asm.contains("_minilib_start:"));
        assert!(asm.contains("read:\n    li a0,6"));
        assert!(asm.contains("write:\n    mv a1,a0"));
        assert!(asm.contains(".space 1145140"));
    }

    #[test]
    fn prologue_and_epilogue_sets_match() {
        let src = indoc! {"
            int f(int a, int b) { return a + b; }
            int main() {
                int x = read();
                int y = f(x, 2);
                int z = x + y;
                write(z);
                return z;
            }
        "};
        let asm = compile(src);
        for name in ["f", "main"] {
            let body = function_body(&asm, name, &["f", "main"]);
            let (saved, restored) = saved_restored(&body);
            assert_eq!(saved, restored, "callee-saved mismatch in `{}`", name);
        }
        // main 有调用，必须保存并恢复 ra
        let body = function_body(&asm, "main", &["f", "main"]);
        assert!(body.iter().any(|l| l.contains("sw ra")));
        assert!(body.iter().any(|l| l.contains("lw ra")));
    }

    #[test]
    fn callee_saved_homes_need_no_call_site_saves() {
        // v 跨越 g 的调用且驻被调用者保存寄存器：调用点不应再保存
        let src = indoc! {"
            int g(int x) { return x; }
            int main() {
                int v = read();
                int w = g(1);
                write(v + w);
                return 0;
            }
        "};
        let asm = compile(src);
        let body = function_body(&asm, "main", &["g", "main"]);
        for reg in ["s0", "s1", "s2", "s3"] {
            let saves = body
                .iter()
                .filter(|l| l.trim_start().starts_with(&format!("sw {},", reg)))
                .count();
            let loads = body
                .iter()
                .filter(|l| l.trim_start().starts_with(&format!("lw {},", reg)))
                .count();
            // 至多一次序幕保存与一次尾声恢复，调用四周没有额外的成对保存
            assert!(saves <= 1, "extra call-site save of {}", reg);
            assert!(loads <= 1, "extra call-site restore of {}", reg);
        }
    }

    #[test]
    fn live_argument_registers_are_parked_around_calls() {
        // a 驻 a0 且跨 write 调用活跃：调用点需要成对的暂存/恢复
        let src = indoc! {"
            int h(int a, int b) {
                write(a);
                return a + b;
            }
            int main() { return h(3, 4); }
        "};
        let asm = compile(src);
        let body = function_body(&asm, "h", &["h", "main"]);
        let call = body
            .iter()
            .position(|l| l.trim() == "call write")
            .expect("missing call");
        assert!(body[..call].iter().any(|l| l.trim_start().starts_with("sw a0,")));
        assert!(body[call..].iter().any(|l| l.trim_start().starts_with("lw a0,")));
        assert!(body[..call].iter().any(|l| l.trim_start().starts_with("sw a1,")));
        assert!(body[call..].iter().any(|l| l.trim_start().starts_with("lw a1,")));
    }

    #[test]
    fn ninth_and_tenth_arguments_go_through_the_stack() {
        let src = indoc! {"
            int f(int p1, int p2, int p3, int p4, int p5, int p6, int p7, int p8,
                  int p9, int p10) {
                return p9 + p10;
            }
            int main() {
                return f(1, 2, 3, 4, 5, 6, 7, 8, 9, 10);
            }
        "};
        let asm = compile(src);
        let main_body = function_body(&asm, "main", &["f", "main"]);
        let call = main_body
            .iter()
            .position(|l| l.trim() == "call f")
            .expect("missing call");
        // 前 8 个实参进 a0..a7
        for k in 0..8 {
            assert!(
                main_body[..call]
                    .iter()
                    .any(|l| l.trim_start().starts_with(&format!("mv a{},", k))),
                "argument {} not moved into a{}",
                k + 1,
                k
            );
        }
        // 第 9、10 个实参存入出参区 sp+0 / sp+4
        assert!(main_body[..call].iter().any(|l| l.trim().ends_with(", 0(sp)")
            && l.trim_start().starts_with("sw ")));
        assert!(main_body[..call].iter().any(|l| l.trim().ends_with(", 4(sp)")
            && l.trim_start().starts_with("sw ")));
        // 被调用方从自身帧之上读回栈传形参
        let f_body = function_body(&asm, "f", &["f", "main"]);
        let frame: i32 = f_body
            .first()
            .and_then(|l| l.trim().strip_prefix("addi sp, sp, -"))
            .and_then(|n| n.parse().ok())
            .expect("missing prologue adjustment");
        assert!(f_body
            .iter()
            .any(|l| l.trim().ends_with(&format!("{}(sp)", frame)) && l.contains("lw ")));
        assert!(f_body
            .iter()
            .any(|l| l.trim().ends_with(&format!("{}(sp)", frame + 4)) && l.contains("lw ")));
    }

    #[test]
    fn spill_under_pressure_produces_stack_traffic() {
        // 14 个跨越整个求和的变量放不进 12 个 s 寄存器
        let src = indoc! {"
            int main() {
                int a = 1; int b = 2; int c = 3; int d = 4; int e = 5;
                int f = 6; int g = 7; int h = 8; int i = 9; int j = 10;
                int k = 11; int l = 12; int m = 13; int n = 14;
                int r = a + b + c + d + e + f + g + h + i + j + k + l + m + n;
                int keep = a + n;
                write(r);
                return keep;
            }
        "};
        let asm = compile(src);
        let body = function_body(&asm, "main", &["main"]);
        // 存在溢出变量：临时寄存器往返栈
        assert!(body.iter().any(|l| l.trim_start().starts_with("sw t")));
        assert!(body.iter().any(|l| l.trim_start().starts_with("lw t")));
        let (saved, restored) = saved_restored(&body);
        assert_eq!(saved, restored);
        assert!(!saved.is_empty());
    }

    #[test]
    fn global_multi_dim_store_uses_la_and_flat_offset() {
        let src = indoc! {"
            int a[2][3][4];
            int main() {
                a[1][2][3] = 7;
                return 0;
            }
        "};
        let asm = compile(src);
        let body = function_body(&asm, "main", &["main"]);
        assert!(body.iter().any(|l| l.trim().starts_with("la ") && l.trim().ends_with(", a")));
        // ((1*3+2)*4+3)*4 的各级步长按由内向外的次序物化
        let li_strides: Vec<i32> = body
            .iter()
            .filter_map(|l| l.trim().strip_prefix("li "))
            .filter_map(|rest| rest.split(", ").nth(1))
            .filter_map(|n| n.parse().ok())
            .filter(|n| [4, 16, 48].contains(n))
            .collect();
        assert_eq!(li_strides, vec![4, 16, 48]);
        // 元素写入经由计算出的地址而非 sp
        assert!(body.iter().any(|l| {
            let l = l.trim();
            l.starts_with("sw ") && l.contains(", 0(") && !l.ends_with("(sp)")
        }));
    }

    #[test]
    fn emission_is_deterministic() {
        let src = indoc! {"
            int fib(int n) {
                if (n < 2) return n;
                return fib(n - 1) + fib(n - 2);
            }
            int main() {
                write(fib(10));
                return 0;
            }
        "};
        // 同一份 IR 两次经过分配与发射，产物必须一致
        let ast = crate::minic::CompUnitParser::new().parse(src).unwrap();
        let source_map = SourceMap::new(src);
        crate::front::semantic::check(&ast, &source_map).unwrap();
        let ir = crate::front::lower::lower_program(&ast).unwrap();
        assert_eq!(
            super::generate_asm(&ir).unwrap(),
            super::generate_asm(&ir).unwrap()
        );
        // 整条流水线端到端同样可重现
        assert_eq!(compile(src), compile(src));
    }

    #[test]
    fn local_array_lives_on_the_stack() {
        let src = indoc! {"
            int main() {
                int buf[10];
                int i = 0;
                while (i < 10) {
                    buf[i] = i;
                    i = i + 1;
                }
                return buf[5];
            }
        "};
        let asm = compile(src);
        let body = function_body(&asm, "main", &["main"]);
        let frame: i32 = body
            .first()
            .and_then(|l| l.trim().strip_prefix("addi sp, sp, -"))
            .and_then(|n| n.parse().ok())
            .expect("missing prologue adjustment");
        // 40 字节数组加标量与保存槽
        assert!(frame >= 40);
        // 基址物化为 sp 的拷贝
        assert!(body.iter().any(|l| l.trim().starts_with("mv ") && l.trim().ends_with(", sp")));
    }
}
