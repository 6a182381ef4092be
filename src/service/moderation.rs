//! 敏感词替换 / Sensitive-word substitution

use parking_lot::RwLock;

pub struct WordFilter {
    words: RwLock<Vec<String>>,
}

impl WordFilter {
    pub fn new(words: Vec<String>) -> Self {
        Self {
            words: RwLock::new(words),
        }
    }

    pub fn apply(&self, text: &str) -> String {
        let words = self.words.read();
        let mut output = text.to_string();
        for word in words.iter() {
            if !word.is_empty() && output.contains(word) {
                let replace = "*".repeat(word.chars().count());
                output = output.replace(word, &replace);
            }
        }
        output
    }

    pub fn reload(&self, words: Vec<String>) {
        *self.words.write() = words;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_replaces_words() {
        let filter = WordFilter::new(vec!["bad".into()]);
        assert_eq!(filter.apply("bad text"), "*** text");
    }

    #[test]
    fn clean_text_is_untouched() {
        let filter = WordFilter::new(vec!["bad".into()]);
        assert_eq!(filter.apply("hello"), "hello");
    }

    #[test]
    fn reload_swaps_the_word_list() {
        let filter = WordFilter::new(vec!["bad".into()]);
        filter.reload(vec!["hello".into()]);
        assert_eq!(filter.apply("hello bad"), "***** bad");
    }
}
