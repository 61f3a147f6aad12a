//! Prompt assembly for grounded answers.
//!
//! Retrieved chunks are laid out in rank order as labelled blocks:
//!
//! ```text
//! [Source 1: a.txt]
//! The sky is blue.
//!
//! [Source 2: b.txt]
//! Grass is green.
//!
//! ```
//!
//! followed by the question and fixed instructions that restrict the model
//! to the given context and ask for an answer, the source names, and
//! optionally supporting evidence.

use crate::models::RetrievedChunk;

const PREAMBLE: &str = "You are an expert document analyst. \
Use the context from the uploaded documents below to answer the question.\n\
----------------\n";

const INSTRUCTIONS: &str = "Answer based only on the context above. \
If the context does not contain the answer, say that you cannot find it in the documents.\n\
Structure your response with:\n\
1. A concise main answer\n\
2. The names of the source documents you used\n\
3. Optionally, key supporting evidence from the context\n\
Answer:";

/// One `[Source i: name]` block per chunk, 1-based, in the given order.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    for (i, hit) in chunks.iter().enumerate() {
        context.push_str(&format!(
            "[Source {}: {}]\n{}\n\n",
            i + 1,
            hit.chunk.source,
            hit.chunk.text
        ));
    }
    context
}

/// Full prompt: context blocks, then the question, then the instructions.
pub fn build_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    format!(
        "{}{}----------------\nQuestion: {}\n\n{}",
        PREAMBLE,
        format_context(chunks),
        question.trim(),
        INSTRUCTIONS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn hit(rank: usize, source: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            rank,
            distance: rank as f32,
            chunk: Chunk {
                id: format!("{}#0:0", source),
                source: source.to_string(),
                page: None,
                chunk_index: 0,
                text: text.to_string(),
                hash: String::new(),
            },
        }
    }

    #[test]
    fn context_blocks_are_labelled_in_order() {
        let ctx = format_context(&[hit(1, "a.txt", "The sky is blue."), hit(2, "b.txt", "Grass is green.")]);
        assert_eq!(
            ctx,
            "[Source 1: a.txt]\nThe sky is blue.\n\n[Source 2: b.txt]\nGrass is green.\n\n"
        );
    }

    #[test]
    fn question_follows_context_and_precedes_instructions() {
        let prompt = build_prompt("  What color is the sky? ", &[hit(1, "a.txt", "The sky is blue.")]);
        let ctx = prompt.find("[Source 1: a.txt]").unwrap();
        let q = prompt.find("Question: What color is the sky?\n").unwrap();
        let instr = prompt.find("Answer based only on the context above.").unwrap();
        assert!(ctx < q && q < instr);
        assert!(prompt.ends_with("Answer:"));
    }

    #[test]
    fn empty_context_still_has_question() {
        let prompt = build_prompt("Anything?", &[]);
        assert!(prompt.contains("Question: Anything?"));
        assert!(!prompt.contains("[Source"));
    }
}
