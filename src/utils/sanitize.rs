use ammonia::Builder;

/// Strips every tag from user-written text. Script and style bodies are
/// dropped along with their tags; other markup keeps only its text.
pub fn plain_text(input: &str) -> String {
    Builder::empty()
        .add_clean_content_tags(&["script", "style"])
        .clean(input)
        .to_string()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markup_is_removed() {
        assert_eq!(plain_text("<b>hi</b><img src=x>"), "hi");
        assert_eq!(
            plain_text(r#"see <a href="https://evil.example">this</a>"#),
            "see this"
        );
        assert_eq!(plain_text("<table><tr><td>cell</td></tr></table>"), "cell");
    }

    #[test]
    fn test_script_bodies_are_dropped() {
        assert_eq!(plain_text("<script>alert(1)</script>ok"), "ok");
        assert_eq!(plain_text("  <style>p{}</style> "), "");
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(plain_text("  Deadline moved to Friday  "), "Deadline moved to Friday");
    }
}
