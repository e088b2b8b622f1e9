//! Reflection-prompt assembly and response parsing.
//!
//! [`GepaAdapter::propose_new_texts`](crate::adapter::GepaAdapter::propose_new_texts)
//! implementations are free to talk to their LM however they like; these
//! helpers cover the common case — render the reflective dataset into a
//! prompt asking for a fenced replacement instruction, then pull the fenced
//! block back out of the response.

use std::sync::OnceLock;

use anyhow::{Context, bail};
use indexmap::IndexMap;
use regex::Regex;

use crate::adapter::{ReflectiveDataset, ReflectiveExample};
use crate::candidate::Candidate;

/// Minimal surface of the reflection LM. Transport, retries, and token
/// accounting live behind this trait, outside the engine.
#[allow(async_fn_in_trait)]
pub trait ReflectionLm {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Renders the reflection prompt for one component.
///
/// The prompt shows the current instruction and the per-example evaluation
/// records, and asks for a replacement instruction inside a fenced block.
pub fn build_reflection_prompt(
    current_instruction: &str,
    examples: &[ReflectiveExample],
) -> String {
    let mut rendered = String::new();
    for (idx, example) in examples.iter().enumerate() {
        rendered.push_str(&format!(
            "### Example {}\nInputs: {}\nGenerated Outputs: {}\nFeedback: {}\n\n",
            idx + 1,
            example.inputs,
            example.generated_outputs,
            example.feedback,
        ));
    }

    format!(
        "I provided an assistant with the following instructions to perform a task:\n\
         ```\n{current_instruction}\n```\n\n\
         The following are examples of inputs the assistant received, the outputs \
         it generated, and feedback on how it could do better:\n\n{rendered}\
         Your task is to write a new instruction for the assistant. Read the \
         examples carefully: identify the niche the task belongs to, what the \
         feedback rewards, and any domain details worth stating outright.\n\n\
         Provide the new instruction within a ``` fenced block."
    )
}

/// Extracts the inner text of the first fenced block in `response`.
///
/// Accepts terminated and unterminated fences, with or without a language
/// tag. A response with no fence at all is taken whole. Returns `None` when
/// the extracted text is empty — the caller turns that into a rejected
/// proposal rather than silently reusing the parent.
pub fn extract_fenced_block(response: &str) -> Option<String> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[^\n]*\n(.*?)(?:\n?```|\z)").expect("fence pattern is valid")
    });

    let inner = match fence.captures(response) {
        Some(captures) => captures.get(1).map_or("", |m| m.as_str()),
        None => response,
    };

    let inner = inner.trim();
    (!inner.is_empty()).then(|| inner.to_string())
}

/// Default `propose_new_texts` path: one reflection call per component.
///
/// # Errors
///
/// Fails when the LM call fails, when a requested component is missing from
/// the reflective dataset, or when a response yields no usable text.
pub async fn propose_new_texts_with_lm<L: ReflectionLm>(
    lm: &L,
    candidate: &Candidate,
    reflective_dataset: &ReflectiveDataset,
    components: &[String],
) -> anyhow::Result<IndexMap<String, String>> {
    let mut new_texts = IndexMap::new();
    for component in components {
        let examples = reflective_dataset
            .get(component)
            .with_context(|| format!("no reflective examples for component `{component}`"))?;
        let current = candidate.get(component).unwrap_or_default();
        let prompt = build_reflection_prompt(current, examples);

        let response = lm
            .generate(&prompt)
            .await
            .with_context(|| format!("reflection LM failed for component `{component}`"))?;

        match extract_fenced_block(&response) {
            Some(text) => {
                new_texts.insert(component.clone(), text);
            }
            None => bail!("reflection LM returned no usable text for component `{component}`"),
        }
    }
    Ok(new_texts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("```\nnew instruction\n```", Some("new instruction"))]
    #[case("```text\nnew instruction\n```\ntrailing prose", Some("new instruction"))]
    #[case("prefix\n```\nunterminated fence", Some("unterminated fence"))]
    #[case("no fence at all", Some("no fence at all"))]
    #[case("```\n\n```", None)]
    #[case("", None)]
    fn fence_extraction(#[case] response: &str, #[case] expected: Option<&str>) {
        assert_eq!(extract_fenced_block(response).as_deref(), expected);
    }

    #[test]
    fn multiline_block_is_kept_verbatim() {
        let response = "Here you go:\n```\nline one\nline two\n```";
        assert_eq!(
            extract_fenced_block(response).as_deref(),
            Some("line one\nline two")
        );
    }

    struct FencedEchoLm;

    impl ReflectionLm for FencedEchoLm {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok("Sure, here is the revised instruction:\n```\nbe concise\n```".to_string())
        }
    }

    struct BlankLm;

    impl ReflectionLm for BlankLm {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok("```\n```".to_string())
        }
    }

    #[tokio::test]
    async fn proposes_one_text_per_component() {
        let candidate = Candidate::from([("instruction", "old text")]);
        let mut dataset = ReflectiveDataset::new();
        dataset.insert(
            "instruction".to_string(),
            vec![ReflectiveExample {
                inputs: serde_json::json!("in"),
                generated_outputs: serde_json::json!("out"),
                feedback: "too verbose".to_string(),
            }],
        );

        let texts = propose_new_texts_with_lm(
            &FencedEchoLm,
            &candidate,
            &dataset,
            &["instruction".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(texts.get("instruction").map(String::as_str), Some("be concise"));
    }

    #[tokio::test]
    async fn unusable_response_is_an_error_not_a_fallback() {
        let candidate = Candidate::from([("instruction", "old text")]);
        let mut dataset = ReflectiveDataset::new();
        dataset.insert("instruction".to_string(), Vec::new());

        let err = propose_new_texts_with_lm(
            &BlankLm,
            &candidate,
            &dataset,
            &["instruction".to_string()],
        )
        .await
        .expect_err("blank responses must not silently reuse the parent");
        assert!(err.to_string().contains("no usable text"));
    }

    #[test]
    fn prompt_includes_instruction_and_feedback() {
        let examples = vec![ReflectiveExample {
            inputs: serde_json::json!({"question": "2+2"}),
            generated_outputs: serde_json::json!("5"),
            feedback: "wrong arithmetic".to_string(),
        }];
        let prompt = build_reflection_prompt("answer questions", &examples);
        assert!(prompt.contains("answer questions"));
        assert!(prompt.contains("wrong arithmetic"));
        assert!(prompt.contains("fenced block"));
    }
}
