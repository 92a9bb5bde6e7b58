//! Outline visualization as ASCII tree.

use folio_kernel::BlockTree;
use folio_types::Block;

const LABEL_CHARS: usize = 40;

/// Format a loaded outline as ASCII tree lines.
///
/// Driven from the flat walk so arbitrarily deep outlines render without
/// recursion.
pub fn format_tree(tree: BlockTree, max_depth: Option<usize>) -> Vec<String> {
    let rows: Vec<(usize, Block)> = tree.into_walk().collect();

    // Walking backwards, a row is last among its siblings unless a later row
    // at the same depth was seen before the walk climbed above it.
    let mut last = vec![false; rows.len()];
    let mut seen: Vec<bool> = Vec::new();
    for (i, (depth, _)) in rows.iter().enumerate().rev() {
        seen.resize(depth + 1, false);
        last[i] = !seen[*depth];
        seen[*depth] = true;
    }

    let mut lines = Vec::new();
    let mut segments: Vec<&str> = Vec::new();
    for ((depth, block), is_last) in rows.iter().zip(last) {
        let depth = *depth;
        if depth == 0 {
            segments.clear();
            lines.push(describe(block));
            continue;
        }
        segments.truncate(depth - 1);
        if !max_depth.is_some_and(|max| depth > max) {
            let connector = if is_last { "└─ " } else { "├─ " };
            lines.push(format!("{}{connector}{}", segments.concat(), describe(block)));
        }
        segments.push(if is_last { "   " } else { "│  " });
    }
    lines
}

/// `short-id [style] "label"`, with the reference kind when there is one.
fn describe(block: &Block) -> String {
    let mut line = format!(
        "{} [{}] \"{}\"",
        block.id.short(),
        block.style_type,
        truncate(&block.label(), LABEL_CHARS)
    );
    if let Some(reference) = &block.reference {
        if block.ref_unavailable() {
            line.push_str(&format!(" -> {} (unavailable)", reference.ref_type));
        } else {
            line.push_str(&format!(" -> {}", reference.ref_type));
        }
    }
    line
}

/// First line only, cut to `max_chars` with an ellipsis.
fn truncate(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(max_chars - 3).collect();
        format!("{truncated}...")
    }
}
