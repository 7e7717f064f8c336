use crate::models::{AssembledPrompt, CapturedFragment, QueryRequest};

pub const EXCERPT_SEPARATOR: &str = "\n";

/// Builds the prompt payload from a question and a context snapshot.
#[derive(Debug, Clone, Copy)]
pub struct QueryAssembler {
    budget_chars: usize,
}

impl QueryAssembler {
    pub fn new(budget_chars: usize) -> Self {
        Self { budget_chars }
    }

    /// Fill the budget newest-first, skipping fragments that do not fit,
    /// then lay the chosen ones out oldest-first.
    pub fn assemble(&self, request: &QueryRequest, snapshot: &[CapturedFragment]) -> AssembledPrompt {
        let separator_len = EXCERPT_SEPARATOR.chars().count();
        let mut used = 0;
        let mut chosen: Vec<&CapturedFragment> = Vec::new();

        for fragment in snapshot.iter().rev() {
            let cost = fragment.char_len() + if chosen.is_empty() { 0 } else { separator_len };
            if used + cost <= self.budget_chars {
                used += cost;
                chosen.push(fragment);
            }
        }
        chosen.reverse();

        let context_excerpt = chosen
            .iter()
            .map(|f| f.text())
            .collect::<Vec<_>>()
            .join(EXCERPT_SEPARATOR);

        AssembledPrompt {
            request_id: request.id,
            question: request.question.clone(),
            context_excerpt,
            asked_at: request.asked_at,
            fragments_used: chosen.len(),
        }
    }
}
