//! # 活跃变量分析
//!
//! 对单个函数的 IR 子序列做标准的后向不动点迭代：
//!
//! ```text
//! out[n] = ∪ in[s]，s 为 n 的后继
//! in[n]  = use[n] ∪ (out[n] \ def[n])
//! ```
//!
//! 后继关系：`Goto` 指向标号所在节点；`CondGoto` 同时有顺序后继和
//! 跳转后继；`Return` 无后继；其余节点顺序后继。按逆序迭代直到
//! 所有 (in, out) 不再变化。

use std::collections::{HashMap, HashSet};

use crate::ir::IrNode;
use crate::CompilerError;

#[derive(Debug, Clone, Default)]
pub struct LiveSet {
    pub live_in: HashSet<String>,
    pub live_out: HashSet<String>,
}

/// 标号名 -> 函数子序列内的节点下标
pub fn build_label_map(nodes: &[IrNode]) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if let IrNode::Label(name) = node {
            map.insert(name.clone(), i);
        }
    }
    map
}

fn successors(
    nodes: &[IrNode],
    index: usize,
    label_map: &HashMap<String, usize>,
) -> Result<Vec<usize>, CompilerError> {
    let resolve = |label: &str| -> Result<usize, CompilerError> {
        label_map.get(label).copied().ok_or_else(|| {
            CompilerError::CodeGenError(format!(
                "branch target `{}` not found in current function",
                label
            ))
        })
    };
    let fallthrough = || {
        if index + 1 < nodes.len() {
            vec![index + 1]
        } else {
            Vec::new()
        }
    };
    match &nodes[index] {
        IrNode::Goto(target) => Ok(vec![resolve(target)?]),
        IrNode::CondGoto { target, .. } => {
            let mut succ = fallthrough();
            succ.push(resolve(target)?);
            Ok(succ)
        }
        IrNode::Return | IrNode::ReturnWithVal(_) => Ok(Vec::new()),
        _ => Ok(fallthrough()),
    }
}

/// 计算函数内每个节点的 in/out 集合
pub fn analyze(nodes: &[IrNode]) -> Result<Vec<LiveSet>, CompilerError> {
    let label_map = build_label_map(nodes);
    let mut sets: Vec<LiveSet> = vec![LiveSet::default(); nodes.len()];

    let mut changed = true;
    while changed {
        changed = false;
        for i in (0..nodes.len()).rev() {
            let mut out = HashSet::new();
            for succ in successors(nodes, i, &label_map)? {
                out.extend(sets[succ].live_in.iter().cloned());
            }
            let def = nodes[i].defs();
            let mut live_in: HashSet<String> =
                nodes[i].uses().into_iter().map(str::to_string).collect();
            for ident in &out {
                if Some(ident.as_str()) != def {
                    live_in.insert(ident.clone());
                }
            }
            if out != sets[i].live_out || live_in != sets[i].live_in {
                sets[i].live_out = out;
                sets[i].live_in = live_in;
                changed = true;
            }
        }
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, CmpOp};

    fn assign(dst: &str, src: &str) -> IrNode {
        IrNode::Assign { dst: dst.to_string(), src: src.to_string() }
    }

    #[test]
    fn straight_line_liveness() {
        // x = #1; y = x; return y
        let nodes = vec![
            IrNode::LoadImm { dst: "x".to_string(), value: 1 },
            assign("y", "x"),
            IrNode::ReturnWithVal("y".to_string()),
        ];
        let live = analyze(&nodes).unwrap();
        assert!(live[0].live_out.contains("x"));
        assert!(!live[1].live_out.contains("x"));
        assert!(live[1].live_out.contains("y"));
        assert!(live[2].live_out.is_empty());
    }

    #[test]
    fn loop_keeps_counter_alive_across_back_edge() {
        // i = #0; LABEL c: IF i < n GOTO b; GOTO e;
        // LABEL b: i = i + one; GOTO c; LABEL e: RETURN
        let nodes = vec![
            IrNode::LoadImm { dst: "i".to_string(), value: 0 },
            IrNode::Label("c".to_string()),
            IrNode::CondGoto {
                lhs: "i".to_string(),
                rhs: "n".to_string(),
                op: CmpOp::Lt,
                target: "b".to_string(),
            },
            IrNode::Goto("e".to_string()),
            IrNode::Label("b".to_string()),
            IrNode::Binop {
                dst: "i".to_string(),
                lhs: "i".to_string(),
                rhs: "one".to_string(),
                op: BinOp::Add,
            },
            IrNode::Goto("c".to_string()),
            IrNode::Label("e".to_string()),
            IrNode::Return,
        ];
        let live = analyze(&nodes).unwrap();
        // 回边让 i 和 n 在循环头保持活跃
        assert!(live[1].live_in.contains("i"));
        assert!(live[1].live_in.contains("n"));
        assert!(live[6].live_out.contains("i"));
        // 出口路径上 i 死亡
        assert!(!live[7].live_in.contains("i"));
    }

    #[test]
    fn unknown_branch_target_is_rejected() {
        let nodes = vec![IrNode::Goto("nowhere".to_string())];
        assert!(analyze(&nodes).is_err());
    }

    #[test]
    fn store_uses_both_operands() {
        let nodes = vec![
            IrNode::LoadImm { dst: "p".to_string(), value: 0 },
            IrNode::LoadImm { dst: "v".to_string(), value: 1 },
            IrNode::Store { addr: "p".to_string(), src: "v".to_string() },
        ];
        let live = analyze(&nodes).unwrap();
        assert!(live[2].live_in.contains("p"));
        assert!(live[2].live_in.contains("v"));
    }
}
