//! Prompt text for the script conversation and the vision OCR call.
//!
//! Every prompt lives here so wording changes touch one file and tests can
//! inspect the exact text without a backend. Callers can replace the pinned
//! instruction through [`crate::config::GenerationConfig::system_prompt`].

use crate::config::GenerationOptions;

/// Pinned instruction, minus the style sentence appended by
/// [`instruction_prompt`].
pub const BASE_INSTRUCTION: &str = r#"You are writing a spoken podcast script from a research document that will be sent to you in numbered sections.

Rules:
1. Stay strictly faithful to the document. Do not invent findings, numbers, authors or citations.
2. For each section, reply with a short plain-text narration of what that section contributes. Keep all technical details that matter.
3. Write for the ear: plain sentences, no markdown, no bullet points, no headings, no HTML.
4. Never write escape sequences such as \n or \t, and never describe sound effects or pauses.
5. Explain jargon briefly the first time it appears."#;

/// Final synthesis request.
pub const SYNTHESIS_PROMPT: &str = r#"You have now seen every section. Write the complete podcast script as continuous spoken prose with these parts, in order:
1. An introduction that states the topic and why it matters.
2. The main body covering the methods and key findings from all sections.
3. The implications and limitations of the work.
4. A short conclusion.

Output only the script text, in plain sentences, with a blank line between paragraphs."#;

/// Prompt sent with a rasterised page to a vision model.
pub const OCR_PROMPT: &str = r#"Transcribe all readable text on this page in natural reading order.
Output plain text only. Do not describe images, do not add commentary, and do not wrap the output in code fences. If the page has no readable text, output nothing."#;

/// Segment recorded in place of a chunk whose turn could not be completed.
pub const DEFAULT_PLACEHOLDER: &str = "[Transition to next topic]";

/// Build the pinned instruction for the given options.
pub fn instruction_prompt(options: &GenerationOptions) -> String {
    format!(
        "{BASE_INSTRUCTION}\n\nStyle: {}\nTarget length: {}.",
        options.content_style.instruction(),
        options.duration
    )
}

/// Supplied turn carrying one chunk. `index` is 1-based.
pub fn chunk_turn(index: usize, total: usize, chunk: &str) -> String {
    format!("RESEARCH SECTION {index} of {total}:\n{chunk}")
}
