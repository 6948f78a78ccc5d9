//! Sentence splitting and batching of request text.

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ';' | '。' | '！' | '？' | '；')
}

fn flush(current: &mut String, out: &mut Vec<String>) {
    let trimmed = current.trim();
    if !trimmed.is_empty() && !trimmed.chars().all(is_sentence_end) {
        out.push(trimmed.to_owned());
    }
    current.clear();
}

/// Splits `text` after sentence-ending punctuation and at line breaks.
///
/// Terminators stay with their sentence. Pieces made only of whitespace or
/// punctuation are dropped, so `"Hi... there"` yields `["Hi.", "there"]`.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c == '\n' || c == '\r' {
            flush(&mut current, &mut out);
            continue;
        }
        current.push(c);
        if is_sentence_end(c) {
            flush(&mut current, &mut out);
        }
    }
    flush(&mut current, &mut out);

    out
}

/// Groups sentences into batches of at most `max_num_sentences`, each joined
/// with a single space. One batch becomes one delivered chunk.
pub fn batches(text: &str, max_num_sentences: usize) -> Vec<String> {
    split_sentences(text)
        .chunks(max_num_sentences.max(1))
        .map(|group| group.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminators_and_newlines() {
        assert_eq!(
            split_sentences("Hello there. How are you?\nFine; thanks"),
            vec!["Hello there.", "How are you?", "Fine;", "thanks"]
        );
    }

    #[test]
    fn drops_punctuation_only_pieces() {
        assert_eq!(split_sentences("Hi... there"), vec!["Hi.", "there"]);
        assert!(split_sentences("  ?! \n ").is_empty());
    }

    #[test]
    fn handles_cjk_full_stops() {
        assert_eq!(split_sentences("你好。再见！"), vec!["你好。", "再见！"]);
    }

    #[test]
    fn batches_group_sentences() {
        let text = "One. Two. Three. Four. Five.";
        assert_eq!(batches(text, 2), vec!["One. Two.", "Three. Four.", "Five."]);
        assert_eq!(batches(text, 1).len(), 5);
        assert_eq!(batches(text, 0).len(), 5);
        assert_eq!(batches(text, 10), vec![text.to_owned()]);
    }

    #[test]
    fn empty_text_has_no_batches() {
        assert!(batches("", 3).is_empty());
    }
}
