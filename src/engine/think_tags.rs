//! Splits `<think>...</think>` spans out of streamed answer text.

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Reasoning(String),
}

/// Incremental splitter. Tags may be cut at any byte boundary between
/// chunks; a possible tag prefix is held back until the next chunk.
#[derive(Debug, Clone, Default)]
pub struct ThinkTagSplitter {
    in_think: bool,
    pending: String,
}

impl ThinkTagSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_think(&self) -> bool {
        self.in_think
    }

    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();
        loop {
            let tag = if self.in_think { CLOSE } else { OPEN };
            match self.pending.find(tag) {
                Some(at) => {
                    let before: String = self.pending.drain(..at).collect();
                    self.pending.drain(..tag.len());
                    self.emit(&mut out, before);
                    self.in_think = !self.in_think;
                }
                None => {
                    let keep = held_back(&self.pending, tag);
                    let split = self.pending.len() - keep;
                    let ready: String = self.pending.drain(..split).collect();
                    self.emit(&mut out, ready);
                    return out;
                }
            }
        }
    }

    /// Flush whatever is held back. An unclosed think span stays reasoning.
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.pending);
        self.emit(&mut out, rest);
        out
    }

    fn emit(&self, out: &mut Vec<Segment>, text: String) {
        if text.is_empty() {
            return;
        }
        out.push(if self.in_think {
            Segment::Reasoning(text)
        } else {
            Segment::Text(text)
        });
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn held_back(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&n| {
            text.len() >= n
                && text.is_char_boundary(text.len() - n)
                && tag.starts_with(&text[text.len() - n..])
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect(chunks: &[&str]) -> Vec<Segment> {
        let mut splitter = ThinkTagSplitter::new();
        let mut out: Vec<Segment> = chunks.iter().flat_map(|c| splitter.push(c)).collect();
        out.extend(splitter.finish());
        out
    }

    #[test]
    fn splits_reasoning_from_answer() {
        assert_eq!(
            collect(&["<think>plan</think>answer"]),
            vec![Segment::Reasoning("plan".into()), Segment::Text("answer".into())]
        );
    }

    #[test]
    fn tags_cut_across_chunks_are_recognized() {
        assert_eq!(
            collect(&["<thi", "nk>a", "b</th", "ink>c"]),
            vec![
                Segment::Reasoning("a".into()),
                Segment::Reasoning("b".into()),
                Segment::Text("c".into()),
            ]
        );
    }

    #[test]
    fn lone_angle_bracket_is_released_on_finish() {
        assert_eq!(collect(&["a <"]), vec![Segment::Text("a ".into()), Segment::Text("<".into())]);
    }

    #[test]
    fn multibyte_text_passes_through() {
        assert_eq!(
            collect(&["<think>深度</think>你好"]),
            vec![Segment::Reasoning("深度".into()), Segment::Text("你好".into())]
        );
    }
}
