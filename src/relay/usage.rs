//! Token usage reconciliation shared by both relay modes.

use super::types::Usage;

/// Counts tokens in `text` for `model`.
///
/// The counting algorithm is pluggable; any `Fn(&str, &str) -> u32` closure
/// works as a counter.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str, model: &str) -> u32;
}

impl<F> TokenCounter for F
where
    F: Fn(&str, &str) -> u32 + Send + Sync,
{
    fn count_tokens(&self, text: &str, model: &str) -> u32 {
        self(text, model)
    }
}

/// Final usage for a relayed completion.
///
/// A non-zero upstream total is trusted as-is. Otherwise completion tokens
/// are counted from each choice's content and added to `prompt_tokens`.
pub fn reconcile_usage<'a, I>(
    upstream: Usage,
    contents: I,
    prompt_tokens: u32,
    model: &str,
    counter: &dyn TokenCounter,
) -> Usage
where
    I: IntoIterator<Item = &'a str>,
{
    if upstream.total_tokens != 0 {
        return upstream;
    }

    let completion_tokens = contents
        .into_iter()
        .map(|content| counter.count_tokens(content, model))
        .fold(0u32, u32::saturating_add);

    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens.saturating_add(completion_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(text: &str, _model: &str) -> u32 {
        text.chars().count() as u32
    }

    #[test]
    fn upstream_total_is_trusted() {
        let upstream = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 99,
        };
        let usage = reconcile_usage(upstream, ["ignored"], 1, "gpt-4o", &chars);
        assert_eq!(usage, upstream);
    }

    #[test]
    fn zero_total_is_recomputed() {
        let usage = reconcile_usage(Usage::default(), ["abc", "de"], 7, "gpt-4o", &chars);
        assert_eq!(
            usage,
            Usage {
                prompt_tokens: 7,
                completion_tokens: 5,
                total_tokens: 12,
            }
        );
    }

    #[test]
    fn zero_total_ignores_partial_upstream_counts() {
        let upstream = Usage {
            prompt_tokens: 100,
            completion_tokens: 100,
            total_tokens: 0,
        };
        let usage = reconcile_usage(upstream, ["xy"], 3, "gpt-4o", &chars);
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 5);
    }

    #[test]
    fn no_choices_counts_prompt_only() {
        let usage = reconcile_usage(Usage::default(), std::iter::empty(), 4, "gpt-4o", &chars);
        assert_eq!(usage.completion_tokens, 0);
        assert_eq!(usage.total_tokens, 4);
    }

    #[test]
    fn counter_called_once_per_choice_with_model() {
        let seen = std::sync::Mutex::new(Vec::new());
        let counter = |text: &str, model: &str| {
            seen.lock().unwrap().push((text.to_string(), model.to_string()));
            1
        };
        let usage = reconcile_usage(Usage::default(), ["a", "b", "c"], 0, "m-1", &counter);
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("a".to_string(), "m-1".to_string()),
                ("b".to_string(), "m-1".to_string()),
                ("c".to_string(), "m-1".to_string()),
            ]
        );
    }
}
