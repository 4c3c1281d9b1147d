//! # 线性中间表示
//!
//! IR 是一个顺序的节点序列：`FuncDef` 节点开启一个函数的子序列，
//! 直到下一个 `FuncDef` 或流结尾。操作数是文本标识符（用户名重整
//! 而来或编译器生成），立即数为 32 位整数。
//!
//! 几条约定：
//!
//! - `Arg` 序列紧贴在它所属的 `Call`/`CallWithRet` 之前，按源码顺序
//!   编号，逢调用重新计数
//! - `Param` 节点只出现在函数体开头，顺序与形参一致
//! - `VarDec` 声明一块局部聚合体，其标识符的值是栈上区域的首地址
//! - 以 `*` 开头的标识符是 IR 生成内部的解引用哨兵，进入 IR 流之前
//!   都会被显式 `Load` 消解，IR 中不出现
//!
//! `Display` 输出与调试转储格式一致，测试也以此为断言目标。

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Pos,  // +
    Neg,  // -
    Not,  // ! 仅在条件语境中有意义
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            UnOp::Pos => "+",
            UnOp::Neg => "-",
            UnOp::Not => "!",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrNode {
    /// dst <- value
    LoadImm { dst: String, value: i32 },
    /// dst <- src
    Assign { dst: String, src: String },
    /// dst <- lhs op rhs
    Binop { dst: String, lhs: String, rhs: String, op: BinOp },
    /// dst <- src op imm
    BinopImm { dst: String, src: String, imm: i32, op: BinOp },
    /// dst <- op src
    Unop { dst: String, src: String, op: UnOp },
    /// dst <- *addr
    Load { dst: String, addr: String },
    /// *addr <- src
    Store { addr: String, src: String },
    Label(String),
    Goto(String),
    /// 若 lhs op rhs 则跳转
    CondGoto { lhs: String, rhs: String, op: CmpOp, target: String },
    /// 函数子序列的起始标记
    FuncDef(String),
    Call(String),
    CallWithRet { dst: String, func: String },
    /// 形参声明（按序）
    Param(String),
    /// 实参传递（按序，逢调用重新计数）
    Arg(String),
    Return,
    ReturnWithVal(String),
    /// 局部聚合体：ident 绑定为 size 字节栈区域的首地址
    VarDec { ident: String, size: i32 },
    /// 数据段标号
    GlobalVar(String),
    /// dst <- &symbol
    LoadGlobal { dst: String, symbol: String },
    /// 数据段中的一个字
    Word(i32),
}

impl IrNode {
    /// 本节点读取的标识符
    pub fn uses(&self) -> Vec<&str> {
        match self {
            IrNode::Assign { src, .. }
            | IrNode::BinopImm { src, .. }
            | IrNode::Unop { src, .. }
            | IrNode::Load { addr: src, .. }
            | IrNode::Arg(src)
            | IrNode::ReturnWithVal(src) => vec![src],
            IrNode::Binop { lhs, rhs, .. } | IrNode::CondGoto { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            IrNode::Store { addr, src } => vec![addr, src],
            _ => Vec::new(),
        }
    }

    /// 本节点定义的标识符
    pub fn defs(&self) -> Option<&str> {
        match self {
            IrNode::LoadImm { dst, .. }
            | IrNode::Assign { dst, .. }
            | IrNode::Binop { dst, .. }
            | IrNode::BinopImm { dst, .. }
            | IrNode::Unop { dst, .. }
            | IrNode::Load { dst, .. }
            | IrNode::CallWithRet { dst, .. }
            | IrNode::LoadGlobal { dst, .. } => Some(dst),
            IrNode::Param(ident) | IrNode::VarDec { ident, .. } => Some(ident),
            _ => None,
        }
    }
}

impl fmt::Display for IrNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IrNode::LoadImm { dst, value } => write!(f, "    {} = #{}", dst, value),
            IrNode::Assign { dst, src } => write!(f, "    {} = {}", dst, src),
            IrNode::Binop { dst, lhs, rhs, op } => {
                write!(f, "    {} = {} {} {}", dst, lhs, op, rhs)
            }
            IrNode::BinopImm { dst, src, imm, op } => {
                write!(f, "    {} = {} {} #{}", dst, src, op, imm)
            }
            IrNode::Unop { dst, src, op } => write!(f, "    {} = {}{}", dst, op, src),
            IrNode::Load { dst, addr } => write!(f, "    {} = *{}", dst, addr),
            IrNode::Store { addr, src } => write!(f, "    *{} = {}", addr, src),
            IrNode::Label(name) => write!(f, "  LABEL {}:", name),
            IrNode::Goto(target) => write!(f, "    GOTO {}", target),
            IrNode::CondGoto { lhs, rhs, op, target } => {
                write!(f, "    IF {} {} {} GOTO {}", lhs, op, rhs, target)
            }
            IrNode::FuncDef(name) => write!(f, "FUNCTION {}:", name),
            IrNode::Call(func) => write!(f, "    CALL {}", func),
            IrNode::CallWithRet { dst, func } => write!(f, "    {} = CALL {}", dst, func),
            IrNode::Param(ident) => write!(f, "    PARAM {}", ident),
            IrNode::Arg(src) => write!(f, "    ARG {}", src),
            IrNode::Return => write!(f, "    RETURN"),
            IrNode::ReturnWithVal(src) => write!(f, "    RETURN {}", src),
            IrNode::VarDec { ident, size } => write!(f, "    DEC {} #{}", ident, size),
            IrNode::GlobalVar(ident) => write!(f, "GLOBAL {}:", ident),
            IrNode::LoadGlobal { dst, symbol } => write!(f, "    {} = &{}", dst, symbol),
            IrNode::Word(value) => write!(f, "    .WORD #{}", value),
        }
    }
}

/// 按 `FuncDef` 边界切分：返回数据段前缀长度与每个函数的 (起始下标, 子序列区间)
pub fn function_ranges(code: &[IrNode]) -> (usize, Vec<(usize, std::ops::Range<usize>)>) {
    let mut starts: Vec<usize> = code
        .iter()
        .enumerate()
        .filter_map(|(i, node)| matches!(node, IrNode::FuncDef(_)).then_some(i))
        .collect();
    let data_end = starts.first().copied().unwrap_or(code.len());
    starts.push(code.len());
    let ranges = starts
        .windows(2)
        .map(|w| (w[0], w[0] + 1..w[1]))
        .collect();
    (data_end, ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_dump_format() {
        let node = IrNode::Binop {
            dst: "_t2".to_string(),
            lhs: "_t0".to_string(),
            rhs: "_t1".to_string(),
            op: BinOp::Mul,
        };
        assert_eq!(node.to_string(), "    _t2 = _t0 * _t1");
        let node = IrNode::CondGoto {
            lhs: "a".to_string(),
            rhs: "b".to_string(),
            op: CmpOp::Le,
            target: "_l0".to_string(),
        };
        assert_eq!(node.to_string(), "    IF a <= b GOTO _l0");
        assert_eq!(IrNode::Label("_l1".to_string()).to_string(), "  LABEL _l1:");
        assert_eq!(IrNode::Word(7).to_string(), "    .WORD #7");
    }

    #[test]
    fn use_def_sets() {
        let node = IrNode::Store { addr: "p".to_string(), src: "x".to_string() };
        assert_eq!(node.uses(), vec!["p", "x"]);
        assert_eq!(node.defs(), None);

        let node = IrNode::CallWithRet { dst: "r".to_string(), func: "f".to_string() };
        assert!(node.uses().is_empty());
        assert_eq!(node.defs(), Some("r"));
    }

    #[test]
    fn function_ranges_split_on_funcdef() {
        let code = vec![
            IrNode::GlobalVar("g".to_string()),
            IrNode::Word(0),
            IrNode::FuncDef("main".to_string()),
            IrNode::Return,
            IrNode::FuncDef("f".to_string()),
            IrNode::Return,
        ];
        let (data_end, ranges) = function_ranges(&code);
        assert_eq!(data_end, 2);
        assert_eq!(ranges, vec![(2, 3..4), (4, 5..6)]);
    }
}
