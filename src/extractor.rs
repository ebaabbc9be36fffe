/// Derives the single-line candidate command from a full model response.
///
/// Returns `None` when nothing usable is left after cleanup. Only the first
/// line is kept; a multi-line answer loses everything after it, and an answer
/// whose first line was only a fence counts as empty.
pub fn extract_command(full_text: &str) -> Option<String> {
    // Outer whitespace, then any run of backticks hugging the text
    let stripped = full_text.trim().trim_matches('`');

    // Fences may also appear in the middle (```bash\n...\n```)
    let unfenced = stripped.replace("```", "");

    // Trailing whitespace (a stray `\r` included) is never part of the command
    let first_line = unfenced.lines().next().unwrap_or("").trim_end();
    if first_line.is_empty() {
        None
    } else {
        Some(first_line.to_string())
    }
}
