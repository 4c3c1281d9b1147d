/// 把字节偏移映射为行列号，供诊断信息使用
#[derive(Debug, Clone)]
pub struct SourceMap {
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(input: &str) -> Self {
        let mut line_starts = vec![0];
        for (index, byte) in input.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(index + 1);
            }
        }
        Self { line_starts }
    }

    /// 行列均从 1 计
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line_index).copied().unwrap_or(0);
        (line_index + 1, offset.saturating_sub(line_start) + 1)
    }

    pub fn format_location(&self, offset: usize) -> String {
        let (line, col) = self.line_col(offset);
        format!("line {}, column {}", line, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_offsets_to_lines_and_columns() {
        let map = SourceMap::new("int main() {\n    return 0;\n}\n");
        assert_eq!(map.line_col(0), (1, 1));
        assert_eq!(map.line_col(4), (1, 5));
        assert_eq!(map.line_col(13), (2, 1));
        assert_eq!(map.line_col(17), (2, 5));
        assert_eq!(map.format_location(27), "line 3, column 1");
    }

    #[test]
    fn offset_on_line_boundary_belongs_to_the_new_line() {
        let map = SourceMap::new("a\nb\n");
        assert_eq!(map.line_col(2), (2, 1));
    }
}
