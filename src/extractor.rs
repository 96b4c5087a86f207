use std::ops::Range;

const FENCE: &str = "```";

/// Byte range of the contents of the last complete fenced block.
///
/// Fences pair up left to right, so an unmatched trailing fence is ignored.
fn last_block_span(text: &str) -> Option<Range<usize>> {
    let mut fences = text.match_indices(FENCE).map(|(index, _)| index);
    let mut last = None;
    while let (Some(open), Some(close)) = (fences.next(), fences.next()) {
        last = Some(open + FENCE.len()..close);
    }
    last
}

/// Returns the non-blank, trimmed lines of the last fenced block in `text`.
///
/// Text without a complete fenced block yields no commands.
pub fn extract_commands(text: &str) -> Vec<String> {
    match last_block_span(text) {
        Some(span) => text[span]
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

/// Swaps one command inside the last fenced block, leaving the rest of the
/// text untouched. Returns `None` when the block holds no such command.
pub fn replace_command(text: &str, original: &str, corrected: &str) -> Option<String> {
    let span = last_block_span(text)?;
    let target = original.trim();
    if target.is_empty() {
        return None;
    }

    let mut offset = span.start;
    for line in text[span.clone()].split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed == target {
            let lead = line.len() - line.trim_start().len();
            let start = offset + lead;
            let end = start + trimmed.len();
            let mut patched = String::with_capacity(text.len() + corrected.len());
            patched.push_str(&text[..start]);
            patched.push_str(corrected.trim());
            patched.push_str(&text[end..]);
            return Some(patched);
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_fenced_commands_in_order() {
        let text = "Steps:\n1. points\n```\nA(0,0)\nB(1,0)\nPolygon[A,B]\n```";
        assert_eq!(extract_commands(text), vec!["A(0,0)", "B(1,0)", "Polygon[A,B]"]);
    }

    #[test]
    fn test_no_fence_yields_nothing() {
        assert!(extract_commands("just prose, no commands").is_empty());
        assert!(extract_commands("").is_empty());
    }

    #[test]
    fn test_unclosed_fence_yields_nothing() {
        assert!(extract_commands("```\nA(0,0)\nB(1,0)").is_empty());
    }

    #[test]
    fn test_only_last_block_counts() {
        let text = "old:\n```\nX=1\n```\nnew:\n```\nA(0,0)\n```\n";
        assert_eq!(extract_commands(text), vec!["A(0,0)"]);
    }

    #[test]
    fn test_unmatched_trailing_fence_keeps_previous_block() {
        let text = "```\nA(0,0)\n```\nthen a stray ``` here";
        assert_eq!(extract_commands(text), vec!["A(0,0)"]);
    }

    #[test]
    fn test_blank_lines_and_padding_are_dropped() {
        let text = "```\n\n   A(0,0)  \n\t\nB(1,0)\n\n```";
        assert_eq!(extract_commands(text), vec!["A(0,0)", "B(1,0)"]);
    }

    #[test]
    fn test_inline_fences_without_newlines() {
        let text = "Join them.\n```A(0,0)\nB(2,0)\nPolygon[A,B]```";
        assert_eq!(extract_commands(text), vec!["A(0,0)", "B(2,0)", "Polygon[A,B]"]);
    }

    #[test]
    fn test_replace_command_inside_last_block() {
        let text = "Use this:\n```\nA(0,0)\n  Circl(A, 2)\n```";
        let patched = replace_command(text, "Circl(A, 2)", "Circle(A, 2)").unwrap();
        assert_eq!(patched, "Use this:\n```\nA(0,0)\n  Circle(A, 2)\n```");
        assert_eq!(extract_commands(&patched), vec!["A(0,0)", "Circle(A, 2)"]);
    }

    #[test]
    fn test_replace_command_ignores_earlier_blocks_and_prose() {
        let text = "Circl(A, 2) failed before\n```\nCircl(A, 2)\n```\nnow:\n```\nA(0,0)\n```";
        assert!(replace_command(text, "Circl(A, 2)", "Circle(A, 2)").is_none());
    }
}
