//! # 线性扫描寄存器分配
//!
//! 从活跃分析的 out 集合导出每个标识符的活跃区间，然后按区间起点
//! 顺序做一遍线性扫描，把标识符指派到被调用者保存寄存器池；池耗尽
//! 时在当前区间与活跃集中最晚结束者之间溢出较晚结束的一方。
//!
//! 形参 1..8 在扫描前已预绑定 a0..a7，扫描时跳过。被逐出的标识符
//! 的寄存器映射被显式移除：任何标识符要么驻寄存器要么驻栈，
//! 不会同时携带两份活跃状态。
//!
//! 为保证输出确定性，扫描顺序对 (区间起点, 标识符名) 全序，
//! 空闲池总是取编号最小的寄存器。

use std::collections::HashMap;

use crate::back::liveness::LiveSet;
use crate::back::target::CALLEE_SAVED_REGISTERS;

/// 活跃区间：[start, end)，以 IR 节点下标计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval {
    pub start: usize,
    pub end: usize,
}

impl LiveInterval {
    /// 在 index 处（含定值点之后）是否仍然活跃
    pub fn spans(&self, index: usize) -> bool {
        self.start < index && index < self.end
    }
}

/// 从 out 集合导出区间：start 取首次出现的节点，end 取末次出现再加一
pub fn build_intervals(live: &[LiveSet]) -> HashMap<String, LiveInterval> {
    let mut intervals: HashMap<String, LiveInterval> = HashMap::new();
    for (i, set) in live.iter().enumerate() {
        for ident in &set.live_out {
            intervals
                .entry(ident.clone())
                .and_modify(|iv| iv.end = i + 1)
                .or_insert(LiveInterval { start: i, end: i + 1 });
        }
    }
    intervals
}

/// 线性扫描。`ident_reg` 进入时携带预绑定（形参 1..8），
/// 返回时包含所有获得寄存器的标识符；其余标识符走栈
pub fn linear_scan(
    intervals: &HashMap<String, LiveInterval>,
    ident_reg: &mut HashMap<String, usize>,
) {
    let mut order: Vec<(&String, &LiveInterval)> = intervals
        .iter()
        .filter(|(ident, _)| !ident_reg.contains_key(*ident))
        .collect();
    order.sort_by(|a, b| (a.1.start, a.0).cmp(&(b.1.start, b.0)));

    let mut free: Vec<usize> = CALLEE_SAVED_REGISTERS.to_vec();
    // active 按区间终点降序排列，队首即溢出候选
    let mut active: Vec<(String, LiveInterval, usize)> = Vec::new();

    for (ident, &interval) in order {
        // 过期区间归还寄存器
        let mut i = 0;
        while i < active.len() {
            if active[i].1.end < interval.start {
                free.push(active[i].2);
                active.remove(i);
            } else {
                i += 1;
            }
        }

        if free.is_empty() {
            // 与活跃集中最晚结束者比较，溢出较晚的一方
            let victim = &active[0];
            if victim.1.end > interval.end {
                let (victim_ident, _, reg) = active.remove(0);
                // 被逐出者转为栈驻留，寄存器映射必须显式清除
                ident_reg.remove(&victim_ident);
                ident_reg.insert(ident.clone(), reg);
                insert_active(&mut active, (ident.clone(), interval, reg));
            }
            // 否则当前区间自身溢出，不进入活跃集
        } else {
            free.sort_unstable();
            let reg = free.remove(0);
            ident_reg.insert(ident.clone(), reg);
            insert_active(&mut active, (ident.clone(), interval, reg));
        }
    }
}

fn insert_active(active: &mut Vec<(String, LiveInterval, usize)>, entry: (String, LiveInterval, usize)) {
    let pos = active
        .iter()
        .position(|(name, iv, _)| (iv.end, name) < (entry.1.end, &entry.0))
        .unwrap_or(active.len());
    active.insert(pos, entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::liveness::analyze;
    use crate::back::target::{is_callee_saved, ARG_REGISTERS};
    use crate::ir::{BinOp, IrNode};

    fn load(dst: &str, value: i32) -> IrNode {
        IrNode::LoadImm { dst: dst.to_string(), value }
    }

    fn add(dst: &str, lhs: &str, rhs: &str) -> IrNode {
        IrNode::Binop {
            dst: dst.to_string(),
            lhs: lhs.to_string(),
            rhs: rhs.to_string(),
            op: BinOp::Add,
        }
    }

    /// n 个变量先全部定值再全部使用，构造 n 路同时活跃
    fn pressure_ir(n: usize) -> Vec<IrNode> {
        let mut nodes = Vec::new();
        for i in 0..n {
            nodes.push(load(&format!("v{}", i), i as i32));
        }
        let mut acc = "v0".to_string();
        for i in 1..n {
            let dst = format!("s{}", i);
            nodes.push(add(&dst, &acc, &format!("v{}", i)));
            acc = dst;
        }
        nodes.push(IrNode::ReturnWithVal(acc));
        nodes
    }

    #[test]
    fn intervals_cover_out_membership() {
        let nodes = vec![load("x", 1), add("y", "x", "x"), IrNode::ReturnWithVal("y".to_string())];
        let live = analyze(&nodes).unwrap();
        let intervals = build_intervals(&live);
        assert_eq!(intervals["x"], LiveInterval { start: 0, end: 1 });
        assert_eq!(intervals["y"], LiveInterval { start: 1, end: 2 });
    }

    #[test]
    fn small_pressure_fits_in_registers() {
        let live = analyze(&pressure_ir(6)).unwrap();
        let intervals = build_intervals(&live);
        let mut ident_reg = HashMap::new();
        linear_scan(&intervals, &mut ident_reg);
        for i in 0..6 {
            let reg = ident_reg[&format!("v{}", i)];
            assert!(is_callee_saved(reg));
        }
    }

    #[test]
    fn pressure_beyond_pool_spills_some_idents() {
        // 14 个同时活跃的变量放不进 12 个被调用者保存寄存器
        let live = analyze(&pressure_ir(14)).unwrap();
        let intervals = build_intervals(&live);
        let mut ident_reg = HashMap::new();
        linear_scan(&intervals, &mut ident_reg);
        let in_regs = (0..14)
            .filter(|i| ident_reg.contains_key(&format!("v{}", i)))
            .count();
        assert!(in_regs <= 12);
        assert!(in_regs >= 10);
        // 同一寄存器不会同时分配给两个重叠区间
        let mut seen = HashMap::new();
        for (ident, reg) in &ident_reg {
            if let Some(other) = seen.insert(*reg, ident.clone()) {
                let a = intervals[ident];
                let b = intervals[&other];
                assert!(a.end <= b.start || b.end <= a.start);
            }
        }
    }

    #[test]
    fn prebound_params_are_skipped() {
        let nodes = vec![
            IrNode::Param("a".to_string()),
            add("x", "a", "a"),
            IrNode::ReturnWithVal("x".to_string()),
        ];
        let live = analyze(&nodes).unwrap();
        let intervals = build_intervals(&live);
        let mut ident_reg = HashMap::new();
        ident_reg.insert("a".to_string(), ARG_REGISTERS[0]);
        linear_scan(&intervals, &mut ident_reg);
        assert_eq!(ident_reg["a"], ARG_REGISTERS[0]);
        assert!(is_callee_saved(ident_reg["x"]));
    }

    #[test]
    fn allocation_is_deterministic() {
        let live = analyze(&pressure_ir(14)).unwrap();
        let intervals = build_intervals(&live);
        let mut first = HashMap::new();
        linear_scan(&intervals, &mut first);
        let mut second = HashMap::new();
        linear_scan(&intervals, &mut second);
        assert_eq!(first, second);
    }
}
