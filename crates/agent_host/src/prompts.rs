//! Prompt template for page chat.

/// Page text wrapped in document markers, followed by the user's message.
pub fn compose_chat_prompt(page_text: &str, user_message: &str) -> String {
    format!(
        "\n--- START DOC ---\n{}\n--- END DOC ---\n\n{}",
        page_text, user_message
    )
}
