//! Head/tail sampling for text over a character ceiling.

/// Keeps `floor(cap * head_ratio)` characters from the start and the rest of
/// the budget from the end, dropping the middle. Text at or under `cap`
/// characters is returned unchanged, so sampling is idempotent.
pub fn sample(text: &str, cap: usize, head_ratio: f32) -> String {
    let total = text.chars().count();
    if total <= cap {
        return text.to_string();
    }
    let ratio = head_ratio.clamp(0.0, 1.0) as f64;
    let head = ((cap as f64) * ratio).floor() as usize;
    let tail = cap - head;

    let head_end = byte_offset(text, head);
    let tail_start = byte_offset(text, total - tail);
    let mut out = String::with_capacity(head_end + (text.len() - tail_start));
    out.push_str(&text[..head_end]);
    out.push_str(&text[tail_start..]);
    out
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}
