//! Folds streamed fragment parts into message blocks

use crate::store::{Block, FunctionOutcome};
use crate::workflow::FragmentPart;

/// Blocks of the response being streamed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseAccumulator {
    blocks: Vec<Block>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from content already present on a placeholder
    pub fn seeded(blocks: &[Block]) -> Self {
        Self {
            blocks: blocks.to_vec(),
        }
    }

    /// Apply parts in order. Consecutive text extends the trailing response
    /// block.
    pub fn apply(&mut self, parts: &[FragmentPart]) {
        for part in parts {
            match part {
                FragmentPart::Text { text } => self.push_text(text),
                FragmentPart::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => self.blocks.push(Block::FunctionCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                    outcome: None,
                }),
                FragmentPart::FunctionResult {
                    call_id,
                    output,
                    is_error,
                } => self.attach_result(call_id, output, *is_error),
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Block::Response { text: existing }) = self.blocks.last_mut() {
            existing.push_str(text);
        } else {
            self.blocks.push(Block::response(text));
        }
    }

    fn attach_result(&mut self, call_id: &str, output: &serde_json::Value, is_error: bool) {
        let pending = self.blocks.iter_mut().rev().find_map(|block| match block {
            Block::FunctionCall {
                call_id: id,
                outcome,
                ..
            } if id.as_str() == call_id && outcome.is_none() => Some(outcome),
            _ => None,
        });
        match pending {
            Some(outcome) => {
                *outcome = Some(FunctionOutcome {
                    output: output.clone(),
                    is_error,
                });
            }
            None => {
                tracing::warn!(call_id, "Function result without a matching call");
            }
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn text(&self) -> String {
        self.blocks.iter().filter_map(Block::text).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn text(t: &str) -> FragmentPart {
        FragmentPart::Text { text: t.into() }
    }

    #[test]
    fn test_text_fragments_merge() {
        let mut acc = ResponseAccumulator::new();
        acc.apply(&[text("Hi")]);
        acc.apply(&[text(" there")]);
        acc.apply(&[text("!")]);

        assert_eq!(acc.blocks(), &[Block::response("Hi there!")]);
    }

    #[test]
    fn test_function_call_splits_text() {
        let mut acc = ResponseAccumulator::new();
        acc.apply(&[
            text("Looking"),
            FragmentPart::FunctionCall {
                call_id: "c1".into(),
                name: "find_assets".into(),
                arguments: json!({"query": "player"}),
            },
        ]);
        acc.apply(&[
            FragmentPart::FunctionResult {
                call_id: "c1".into(),
                output: json!(["Player.prefab"]),
                is_error: false,
            },
            text("Found it"),
        ]);

        assert_eq!(acc.blocks().len(), 3);
        match &acc.blocks()[1] {
            Block::FunctionCall { outcome, .. } => {
                assert_eq!(outcome.as_ref().unwrap().output, json!(["Player.prefab"]));
            }
            other => panic!("expected function call, got {other:?}"),
        }
        assert_eq!(acc.text(), "LookingFound it");
    }

    #[test]
    fn test_orphan_result_is_ignored() {
        let mut acc = ResponseAccumulator::new();
        acc.apply(&[FragmentPart::FunctionResult {
            call_id: "missing".into(),
            output: json!(null),
            is_error: true,
        }]);
        assert!(acc.blocks().is_empty());
    }

    #[test]
    fn test_seeded_continues_partial_text() {
        let mut acc = ResponseAccumulator::seeded(&[Block::response("Partial")]);
        acc.apply(&[text(" answer")]);
        assert_eq!(acc.text(), "Partial answer");
    }

    proptest! {
        #[test]
        fn prop_text_is_concatenation(chunks in proptest::collection::vec("[a-zA-Z !]{0,8}", 0..20)) {
            let mut acc = ResponseAccumulator::new();
            for chunk in &chunks {
                acc.apply(&[text(chunk)]);
            }
            prop_assert_eq!(acc.text(), chunks.concat());
            prop_assert!(acc.blocks().len() <= 1);
        }
    }
}
