use crate::back::insts::Instruction;

/// 按发射顺序累积的指令序列
pub struct AsmProgram {
    instructions: Vec<Instruction>,
}

impl AsmProgram {
    pub fn new() -> Self {
        Self { instructions: Vec::new() }
    }

    pub fn push(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    /// 渲染为最终文本，每条指令一行
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for inst in &self.instructions {
            out.push_str(&inst.to_string());
            out.push('\n');
        }
        out
    }
}
