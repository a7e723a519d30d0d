use std::sync::Arc;

use crate::lang::registry::NULL_LANGUAGE;
use crate::lang::Language;

/// One (language, countdown) pair on the sequencer stack.
///
/// A nonzero countdown is decremented once per instruction decoded while
/// the frame is current and the frame is popped when it reaches zero;
/// zero means the frame never auto-pops.
#[derive(Debug, Clone)]
struct Frame {
    lang: Arc<Language>,
    countdown: u32,
}

/// Decides which language decodes the next instruction.
///
/// A stack of frames, last pushed active; an empty stack derives the
/// null language, which ends the traversal. [`Sequencer::advance`] does
/// not tick countdowns immediately: the tick is deferred to the next
/// [`Sequencer::current`] query and applied to the frame that was
/// current when the instruction was decoded, so a temporary switch
/// pushed by that instruction never consumes its own first countdown
/// step.
#[derive(Debug, Clone)]
pub struct Sequencer {
    stack: Vec<Frame>,
    /// Stack index of the frame returned by the last `current()` query.
    current_index: Option<usize>,
    /// Deferred countdown tick, owed by the last decoded instruction.
    pending_tick: Option<usize>,
}

impl Sequencer {
    pub fn new(lang: &Arc<Language>) -> Self {
        let mut seq = Self::empty();
        seq.switch_permanently(lang);
        seq
    }

    pub fn empty() -> Self {
        Self {
            stack: vec![],
            current_index: None,
            pending_tick: None,
        }
    }

    /// The language decoding the next instruction, after settling any
    /// deferred countdown tick.
    pub fn current(&mut self) -> Arc<Language> {
        if let Some(ix) = self.pending_tick.take() {
            if ix < self.stack.len() && self.stack[ix].countdown > 0 {
                self.stack[ix].countdown -= 1;
                if self.stack[ix].countdown == 0 {
                    self.stack.remove(ix);
                }
            }
        }
        self.current_index = self.stack.len().checked_sub(1);
        match self.stack.last() {
            Some(frame) => frame.lang.clone(),
            None => NULL_LANGUAGE.clone(),
        }
    }

    /// One instruction was decoded; owe a countdown tick to its frame.
    pub fn advance(&mut self) {
        self.pending_tick = self.current_index;
    }

    /// Clear the stack and make `lang` current indefinitely.
    pub fn switch_permanently(&mut self, lang: &Arc<Language>) {
        self.stack.clear();
        self.stack.push(Frame {
            lang: lang.clone(),
            countdown: 0,
        });
    }

    /// Push `lang` with its own default countdown.
    pub fn switch_temporarily(&mut self, lang: &Arc<Language>) {
        self.stack.push(Frame {
            lang: lang.clone(),
            countdown: lang.default_countdown(),
        });
    }

    /// Pop the current frame, if any.
    pub fn switch_back(&mut self) {
        self.stack.pop();
    }

    /// Overwrite the current frame's countdown in place.
    pub fn set_countdown(&mut self, countdown: u32) {
        if let Some(frame) = self.stack.last_mut() {
            frame.countdown = countdown;
        }
    }

    /// Clear the stack; the traversal ends at the next query.
    pub fn terminate(&mut self) {
        self.stack.clear();
    }

    /// A copy suitable for seeding a new traversal, without the tick
    /// owed by the instruction being decoded.
    pub fn snapshot(&self) -> Sequencer {
        Sequencer {
            stack: self.stack.clone(),
            current_index: None,
            pending_tick: None,
        }
    }

    /// The language a traversal seeded from this stack would start in,
    /// without mutating the stack.
    pub fn peek(&self) -> Arc<Language> {
        match self.stack.last() {
            Some(frame) => frame.lang.clone(),
            None => NULL_LANGUAGE.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::lang::LanguageBody;

    fn lang(name: &str, countdown: u32) -> Arc<Language> {
        Arc::new(Language::new(
            name,
            countdown,
            false,
            0,
            vec![],
            vec![],
            LanguageBody::Empty,
        ))
    }

    #[test]
    fn test_empty_stack_is_null() {
        let mut seq = Sequencer::empty();
        assert!(seq.current().is_null());
    }

    #[test]
    fn test_permanent_switch_never_expires() {
        let mut seq = Sequencer::new(&lang("main", 0));
        for _ in 0..100 {
            assert_eq!(seq.current().name(), "main");
            seq.advance();
        }
    }

    #[test]
    fn test_temporary_switch_reverts_after_countdown() {
        let mut seq = Sequencer::new(&lang("main", 0));
        assert_eq!(seq.current().name(), "main");
        // The switching instruction pushes mid-decode, then advances.
        seq.switch_temporarily(&lang("data", 2));
        seq.advance();
        // Exactly two instructions decode in `data`.
        assert_eq!(seq.current().name(), "data");
        seq.advance();
        assert_eq!(seq.current().name(), "data");
        seq.advance();
        assert_eq!(seq.current().name(), "main");
    }

    #[test]
    fn test_countdown_one_decodes_one_instruction() {
        let mut seq = Sequencer::new(&lang("main", 0));
        seq.current();
        seq.switch_temporarily(&lang("child", 1));
        seq.advance();
        assert_eq!(seq.current().name(), "child");
        seq.advance();
        assert_eq!(seq.current().name(), "main");
    }

    #[test]
    fn test_countdown_zero_is_indefinite() {
        let mut seq = Sequencer::new(&lang("main", 0));
        seq.current();
        seq.switch_temporarily(&lang("data", 0));
        seq.advance();
        for _ in 0..10 {
            assert_eq!(seq.current().name(), "data");
            seq.advance();
        }
    }

    #[test]
    fn test_switch_back_pops() {
        let mut seq = Sequencer::new(&lang("main", 0));
        seq.current();
        seq.switch_temporarily(&lang("data", 0));
        seq.advance();
        assert_eq!(seq.current().name(), "data");
        seq.switch_back();
        seq.advance();
        assert_eq!(seq.current().name(), "main");
    }

    #[test]
    fn test_set_countdown_overwrites() {
        let mut seq = Sequencer::new(&lang("main", 0));
        seq.current();
        seq.switch_temporarily(&lang("data", 5));
        seq.set_countdown(1);
        seq.advance();
        assert_eq!(seq.current().name(), "data");
        seq.advance();
        assert_eq!(seq.current().name(), "main");
    }

    #[test]
    fn test_terminate_clears() {
        let mut seq = Sequencer::new(&lang("main", 0));
        seq.current();
        seq.terminate();
        assert!(seq.current().is_null());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut seq = Sequencer::new(&lang("main", 0));
        seq.current();
        seq.switch_temporarily(&lang("data", 1));
        let mut snap = seq.snapshot();
        seq.terminate();
        assert_eq!(snap.peek().name(), "data");
        assert_eq!(snap.current().name(), "data");
    }
}
