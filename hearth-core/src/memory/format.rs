//! Prompt-facing renderings of memory documents.

use super::MemoryDocument;

/// `strftime` pattern for memory timestamps, e.g. `March 03, 2024, 09:15 PM`.
pub const TIMESTAMP_FORMAT: &str = "%B %d, %Y, %I:%M %p";

/// Render one memory as `"<prefix>[<created_at>] <text>"`.
#[must_use]
pub fn format_memory_detail(memory: &MemoryDocument, prefix: &str) -> String {
    format!(
        "{prefix}[{}] {}",
        memory.created_at.format(TIMESTAMP_FORMAT),
        memory.text.trim()
    )
}

/// One detailed line per memory, each prefixed with `prefix`.
#[must_use]
pub fn format_memories_detail(memories: &[MemoryDocument], prefix: &str) -> String {
    memories
        .iter()
        .map(|m| format_memory_detail(m, prefix))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Memory texts joined with `"; "`.
#[must_use]
pub fn format_memories_simple(memories: &[MemoryDocument]) -> String {
    memories
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn doc(text: &str) -> MemoryDocument {
        let at = Utc.with_ymd_and_hms(2024, 3, 3, 21, 15, 0).single().expect("valid");
        MemoryDocument::new(text, 0.1, at, 0)
    }

    #[test]
    fn detail_uses_month_name_and_twelve_hour_clock() {
        assert_eq!(
            format_memory_detail(&doc("  I heard howling  "), ""),
            "[March 03, 2024, 09:15 PM] I heard howling"
        );
        assert_eq!(
            format_memory_detail(&doc("I heard howling"), "2. "),
            "2. [March 03, 2024, 09:15 PM] I heard howling"
        );
    }

    #[test]
    fn multi_memory_renderings() {
        let memories = vec![doc("a"), doc("b")];
        assert_eq!(format_memories_simple(&memories), "a; b");
        assert_eq!(
            format_memories_detail(&memories, "- "),
            "- [March 03, 2024, 09:15 PM] a\n- [March 03, 2024, 09:15 PM] b"
        );
    }
}
