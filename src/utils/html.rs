// src/utils/html.rs

/// Clean question text using the ammonia library.
///
/// Question text is rendered as HTML by the quiz and generator pages, so
/// derived questions are sanitized before they reach the shared document.
/// Safe inline markup (<b>, <br>, <p>) survives; <script>, <iframe> and event
/// handler attributes are stripped.
pub fn clean_question_text(input: &str) -> String {
    ammonia::clean(input).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_tags() {
        let cleaned = clean_question_text("보험료는?<script>alert(1)</script>");
        assert_eq!(cleaned, "보험료는?");
    }

    #[test]
    fn markup_only_text_cleans_to_empty() {
        assert_eq!(clean_question_text("  <script>x()</script>  "), "");
    }

    #[test]
    fn keeps_plain_text() {
        assert_eq!(clean_question_text("2+2=?"), "2+2=?");
    }
}
