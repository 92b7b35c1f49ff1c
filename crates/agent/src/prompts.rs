//! Fixed prompt texts sent to the completion service.

/// Sentinel the extraction prompts ask the model to return when a field is absent.
pub const NOT_FOUND: &str = "NOT_FOUND";

pub fn classification(text: &str) -> String {
    format!(
        r#"Classify the user's intent into exactly one category:

Categories:
- greeting: Casual greetings like "hi", "hello", "how are you"
- inquiry: Questions about product, pricing, features, policies
- high_intent: Expressions of interest like "want to try", "sign up", "get started", "interested"

User message: "{text}"

Respond with ONLY the category name (greeting, inquiry, or high_intent)."#
    )
}

pub fn name_extraction(text: &str) -> String {
    format!(
        r#"Extract the person's name from this message: "{text}"

If a name is present, respond with ONLY the name. If no name is found, respond with "{NOT_FOUND}"."#
    )
}

pub fn email_extraction(text: &str) -> String {
    format!(
        r#"Extract the email address from this message: "{text}"

If an email is present, respond with ONLY the email. If no email is found, respond with "{NOT_FOUND}"."#
    )
}

pub fn platform_extraction(text: &str) -> String {
    format!(
        r#"Extract the social media platform from this message: "{text}"

Common platforms: Instagram, Facebook, YouTube, TikTok, Twitter, LinkedIn

If a platform is mentioned, respond with ONLY the platform name. If no platform is found, respond with "{NOT_FOUND}"."#
    )
}

pub fn answer(context: &str, question: &str) -> String {
    format!(
        r#"You are a helpful assistant for AutoStream, an AI-powered video editing SaaS platform.

Answer the user's question using ONLY the information provided in the context below. If the context doesn't contain enough information to answer the question, say so politely.

Context:
{context}

User question: {question}

Provide a clear, concise answer based on the context above."#
    )
}
